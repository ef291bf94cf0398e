//! Block and header types for the consensus engine.

use crate::types::{Hash256, MnId, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn build_merkle_root(mut hashes: Vec<Hash256>) -> Hash256 {
    if hashes.is_empty() {
        return [0u8; 32];
    }
    while hashes.len() > 1 {
        if hashes.len() % 2 == 1 {
            hashes.push(*hashes.last().unwrap());
        }
        hashes = hashes
            .chunks(2)
            .map(|pair| {
                let mut hasher = Sha256::new();
                hasher.update(pair[0]);
                hasher.update(pair[1]);
                hasher.finalize().into()
            })
            .collect();
    }
    hashes[0]
}

pub fn calculate_merkle_root(txs: &[Transaction]) -> Hash256 {
    let hashes: Vec<Hash256> = txs.iter().map(|tx| tx.txid()).collect();
    build_merkle_root(hashes)
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    /// Slot-aligned timestamp computed by the scheduler (§4.2); the
    /// verifier recomputes the expected producer from exactly this value.
    pub timestamp: i64,
    /// The MN the slot formula selected for this block's timestamp (§4.2).
    pub producer_mn_id: MnId,
}

impl BlockHeader {
    /// The content hash signed by the producer and checked by every
    /// verifier. Deliberately excludes the signature itself.
    pub fn content_hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.previous_hash);
        hasher.update(self.merkle_root);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.producer_mn_id);
        hasher.finalize().into()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// DER-encoded ECDSA signature by the producer's operator key over
    /// `header.content_hash()` (§4.3).
    pub signature: Vec<u8>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.content_hash()
    }

    pub fn recompute_merkle_root(&mut self) {
        self.header.merkle_root = calculate_merkle_root(&self.transactions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TxInput, TxOutput};

    fn tx(seed: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::new([seed; 32], 0),
                script_sig: vec![seed],
                sequence: 0xFFFF_FFFF,
            }],
            outputs: vec![TxOutput {
                value: seed as u64 * 100,
                script_pubkey: vec![seed],
            }],
            lock_time: 0,
            timestamp: seed as i64,
            special: None,
        }
    }

    #[test]
    fn merkle_root_is_order_independent_after_canonical_sort() {
        let (t1, t2, t3) = (tx(1), tx(2), tx(3));
        let mut a = vec![t1.clone(), t2.clone(), t3.clone()];
        let mut b = vec![t3.clone(), t1.clone(), t2.clone()];
        a.sort_by_key(|t| t.txid());
        b.sort_by_key(|t| t.txid());
        assert_eq!(calculate_merkle_root(&a), calculate_merkle_root(&b));
    }

    #[test]
    fn empty_block_has_zero_merkle_root() {
        assert_eq!(calculate_merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn single_tx_merkle_root_equals_txid() {
        let t = tx(9);
        assert_eq!(calculate_merkle_root(&[t.clone()]), t.txid());
    }

    #[test]
    fn content_hash_excludes_signature() {
        let header = BlockHeader {
            version: 1,
            height: 10,
            previous_hash: [1u8; 32],
            merkle_root: [2u8; 32],
            timestamp: 1000,
            producer_mn_id: [3u8; 32],
        };
        let b1 = Block {
            header: header.clone(),
            transactions: vec![],
            signature: vec![1, 2, 3],
        };
        let b2 = Block {
            header,
            transactions: vec![],
            signature: vec![4, 5, 6],
        };
        assert_eq!(b1.hash(), b2.hash());
    }
}
