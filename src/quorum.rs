//! C4 — Finality Quorum Selector.
//!
//! Per rotation cycle, derives a deterministic subset of *operators* (not
//! masternodes — one representative key per operator, §9) to act as
//! finality signers for every block in that cycle, excluding the block's
//! own producer so the producer cannot vote itself final (§9 "chicken and
//! egg" design note). A producer's *other* masternodes, sharing the same
//! operator key as some other MN's, remain eligible: the exclusion is of
//! the producer MN's specific operator key for that one block, not of every
//! MN that operator runs in general — quorum *membership* is decided once
//! per cycle and does not change block to block.

use crate::masternode_registry::MasternodeRegistry;
use crate::types::{Hash256, MnId, OperatorPubKey};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuorumError {
    #[error("no operators available for quorum selection")]
    NoOperators,
}

/// `cycle_index = height / rotation_length` (§4.4).
pub fn cycle_index(height: u64, rotation_length: u64) -> u64 {
    height / rotation_length
}

fn selection_score(seed: &[u8], operator_pubkey: &OperatorPubKey) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(operator_pubkey);
    hasher.finalize().into()
}

/// `SHA256(prev_cycle_block_hash ∥ cycle_index ∥ "HU_QUORUM")` (§4.4).
pub fn quorum_seed(prev_cycle_block_hash: &Hash256, cycle: u64) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(prev_cycle_block_hash);
    hasher.update(cycle.to_le_bytes());
    hasher.update(b"HU_QUORUM");
    hasher.finalize().into()
}

/// One operator per unique key, so a single operator managing N masternodes
/// counts once toward quorum membership regardless of N (§9).
fn unique_operators(registry: &MasternodeRegistry) -> Vec<OperatorPubKey> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    registry.for_each(true, |record| {
        if seen.insert(record.operator_pubkey) {
            out.push(record.operator_pubkey);
        }
    });
    out
}

/// The quorum for one rotation cycle: the top `quorum_size` operators by
/// selection score, excluding `producer_operator` (the block's own
/// producer's operator key).
#[derive(Debug, Clone)]
pub struct Quorum {
    pub cycle: u64,
    pub members: Vec<OperatorPubKey>,
}

impl Quorum {
    pub fn is_member(&self, operator_pubkey: &OperatorPubKey) -> bool {
        self.members.iter().any(|m| m == operator_pubkey)
    }
}

/// Select the quorum for `height`'s cycle, excluding the given block's
/// producer operator key (§4.4). `prev_cycle_block_hash` is the hash of the
/// block immediately preceding this cycle's first height, so the seed is
/// fixed for the whole cycle.
pub fn select_quorum(
    registry: &MasternodeRegistry,
    prev_cycle_block_hash: &Hash256,
    height: u64,
    rotation_length: u64,
    quorum_size: usize,
    producer_operator: &OperatorPubKey,
) -> Result<Quorum, QuorumError> {
    let cycle = cycle_index(height, rotation_length);
    let seed = quorum_seed(prev_cycle_block_hash, cycle);
    let mut operators = unique_operators(registry);
    operators.retain(|op| op != producer_operator);
    if operators.is_empty() {
        return Err(QuorumError::NoOperators);
    }
    operators.sort_by(|a, b| {
        let sa = selection_score(&seed, a);
        let sb = selection_score(&seed, b);
        sb.cmp(&sa).then_with(|| a.cmp(b))
    });
    operators.truncate(quorum_size);
    Ok(Quorum {
        cycle,
        members: operators,
    })
}

/// Membership check for a single masternode: is its *operator* in the
/// quorum for this block? (§4.4 "membership checks".)
pub fn mn_in_quorum(registry: &MasternodeRegistry, quorum: &Quorum, mn_id: &MnId) -> bool {
    match registry.get(mn_id) {
        Some(record) => quorum.is_member(&record.operator_pubkey),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::OperatorKeypair;
    use crate::masternode_registry::RegisterPayload;
    use crate::types::{OutPoint, SpecialTxType, Transaction};

    fn fresh_registry() -> MasternodeRegistry {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        std::mem::forget(dir);
        MasternodeRegistry::open(db).unwrap()
    }

    fn register(registry: &MasternodeRegistry, mn_id: MnId, op: &OperatorKeypair, owner: Hash256) {
        let payload = RegisterPayload {
            mn_id,
            operator_pubkey: op.public_key(),
            collateral_outpoint: OutPoint::new([9u8; 32], 0),
            payout_script: vec![0x51],
            owner_key_hash: owner,
            voting_key_hash: owner,
            service_endpoint: "127.0.0.1:1".into(),
        };
        let tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![],
            lock_time: 0,
            timestamp: 0,
            special: Some((SpecialTxType::Register as u8, bincode::serialize(&payload).unwrap())),
        };
        registry.process_block(&[tx], 1).unwrap();
    }

    #[test]
    fn quorum_excludes_producer_operator() {
        let registry = fresh_registry();
        let producer_kp = OperatorKeypair::generate();
        register(&registry, [1u8; 32], &producer_kp, [1u8; 32]);
        for i in 2u8..=6 {
            register(&registry, [i; 32], &OperatorKeypair::generate(), [i; 32]);
        }
        let quorum = select_quorum(&registry, &[0u8; 32], 10, 100, 3, &producer_kp.public_key()).unwrap();
        assert_eq!(quorum.members.len(), 3);
        assert!(!quorum.is_member(&producer_kp.public_key()));
    }

    #[test]
    fn quorum_is_deterministic() {
        let registry = fresh_registry();
        for i in 1u8..=10 {
            register(&registry, [i; 32], &OperatorKeypair::generate(), [i; 32]);
        }
        let a = select_quorum(&registry, &[7u8; 32], 50, 100, 5, &[0u8; 33]).unwrap();
        let b = select_quorum(&registry, &[7u8; 32], 50, 100, 5, &[0u8; 33]).unwrap();
        assert_eq!(a.members, b.members);
    }

    #[test]
    fn operator_managing_multiple_mns_counts_once() {
        let registry = fresh_registry();
        let shared_kp = OperatorKeypair::generate();
        register(&registry, [1u8; 32], &shared_kp, [1u8; 32]);
        register(&registry, [2u8; 32], &shared_kp, [2u8; 32]);
        let quorum = select_quorum(&registry, &[3u8; 32], 10, 100, 5, &[0u8; 33]).unwrap();
        assert_eq!(quorum.members.len(), 1);
    }
}
