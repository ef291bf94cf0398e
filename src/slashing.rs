//! C11 — Double-Sign Recorder (§4.11).
//!
//! Keeps a rolling window of `(height, mn_id) -> (block_hash, signature)` so
//! a second, conflicting signature from the same masternode at the same
//! height is recognizable as equivocation rather than a harmless retransmit.
//! Detection applies PoSe penalty immediately and hands back the evidence so
//! the caller (the finality aggregator) can refuse the new signature rather
//! than folding it into the block's finality record.

use crate::constants::registry::{DOUBLE_SIGN_PENALTY, POSE_BAN_CEILING};
use crate::constants::slashing::{CLEANUP_INTERVAL_HEIGHTS, WINDOW_HEIGHTS};
use crate::masternode_registry::MasternodeRegistry;
use crate::types::{DoubleSignEvidence, Hash256, MnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

#[derive(Default)]
pub struct SlashingRecorder {
    window: Mutex<HashMap<(u64, MnId), (Hash256, Vec<u8>)>>,
    evidence: Mutex<Vec<DoubleSignEvidence>>,
}

impl SlashingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a signer's signature for `height`. If a different block hash
    /// was already on file for this `(height, mn_id)` slot, this is a
    /// double-sign: evidence is recorded, a PoSe penalty is applied through
    /// `registry`, and the evidence is handed back so the caller refuses the
    /// new signature instead of accepting it. Re-submitting the same
    /// `block_hash` is a no-op (retransmit, not evidence).
    pub fn record(
        &self,
        height: u64,
        mn_id: MnId,
        block_hash: Hash256,
        signature: Vec<u8>,
        registry: &MasternodeRegistry,
        detected_at: i64,
    ) -> Option<DoubleSignEvidence> {
        let key = (height, mn_id);
        let mut window = self.window.lock();
        match window.get(&key) {
            Some((prev_hash, prev_sig)) if *prev_hash != block_hash => {
                let evidence = DoubleSignEvidence {
                    mn_id,
                    height,
                    block_hash_1: *prev_hash,
                    sig_1: prev_sig.clone(),
                    block_hash_2: block_hash,
                    sig_2: signature,
                    detected_at,
                };
                warn!(height, mn_id = %hex::encode(mn_id), "double-sign detected");
                let _ = registry.apply_penalty(&mn_id, DOUBLE_SIGN_PENALTY, POSE_BAN_CEILING);
                self.evidence.lock().push(evidence.clone());
                Some(evidence)
            }
            Some(_) => None,
            None => {
                window.insert(key, (block_hash, signature));
                None
            }
        }
    }

    /// Drop window entries older than `WINDOW_HEIGHTS`, run every
    /// `CLEANUP_INTERVAL_HEIGHTS` blocks so it isn't a per-block cost.
    pub fn cleanup(&self, current_height: u64) {
        if current_height % CLEANUP_INTERVAL_HEIGHTS != 0 {
            return;
        }
        let floor = current_height.saturating_sub(WINDOW_HEIGHTS);
        self.window.lock().retain(|(h, _), _| *h >= floor);
    }

    pub fn evidence_for_height(&self, height: u64) -> Vec<DoubleSignEvidence> {
        self.evidence
            .lock()
            .iter()
            .filter(|e| e.height == height)
            .cloned()
            .collect()
    }

    pub fn window_len(&self) -> usize {
        self.window.lock().len()
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

    fn register(registry: &MasternodeRegistry, mn_id: MnId, op: &OperatorKeypair) {
        let payload = RegisterPayload {
            mn_id,
            operator_pubkey: op.public_key(),
            collateral_outpoint: OutPoint::new([9u8; 32], 0),
            payout_script: vec![0x51],
            owner_key_hash: mn_id,
            voting_key_hash: mn_id,
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
    fn same_block_twice_is_not_evidence() {
        let registry = fresh_registry();
        let kp = OperatorKeypair::generate();
        register(&registry, [1u8; 32], &kp);
        let recorder = SlashingRecorder::new();
        assert!(recorder
            .record(10, [1u8; 32], [5u8; 32], vec![1, 2, 3], &registry, 1000)
            .is_none());
        assert!(recorder
            .record(10, [1u8; 32], [5u8; 32], vec![1, 2, 3], &registry, 1001)
            .is_none());
    }

    #[test]
    fn conflicting_block_hash_is_double_sign() {
        let registry = fresh_registry();
        let kp = OperatorKeypair::generate();
        register(&registry, [1u8; 32], &kp);
        let recorder = SlashingRecorder::new();
        assert!(recorder
            .record(10, [1u8; 32], [5u8; 32], vec![1], &registry, 1000)
            .is_none());
        let evidence = recorder
            .record(10, [1u8; 32], [9u8; 32], vec![2], &registry, 1001)
            .expect("conflicting hash must produce evidence");
        assert_eq!(evidence.block_hash_1, [5u8; 32]);
        assert_eq!(evidence.block_hash_2, [9u8; 32]);
        assert!(registry.get(&[1u8; 32]).unwrap().penalty_score >= DOUBLE_SIGN_PENALTY);
    }

    #[test]
    fn cleanup_drops_entries_outside_window() {
        let registry = fresh_registry();
        let kp = OperatorKeypair::generate();
        register(&registry, [1u8; 32], &kp);
        let recorder = SlashingRecorder::new();
        recorder.record(10, [1u8; 32], [5u8; 32], vec![1], &registry, 1000);
        recorder.cleanup(10 + WINDOW_HEIGHTS + CLEANUP_INTERVAL_HEIGHTS);
        assert_eq!(recorder.window_len(), 0);
    }
}
