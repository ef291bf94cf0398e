//! Genesis block construction.

use crate::block::types::{calculate_merkle_root, Block, BlockHeader};

/// The network-wide genesis block: height 0, no producer, no signature.
/// Every node constructs this identically from the network constants.
pub fn genesis_block(network_magic: &str, timestamp: i64) -> Block {
    let transactions = Vec::new();
    let merkle_root = calculate_merkle_root(&transactions);
    let mut previous_hash = [0u8; 32];
    let magic_bytes = network_magic.as_bytes();
    let n = magic_bytes.len().min(32);
    previous_hash[..n].copy_from_slice(&magic_bytes[..n]);

    Block {
        header: BlockHeader {
            version: 1,
            height: 0,
            previous_hash,
            merkle_root,
            timestamp,
            producer_mn_id: [0u8; 32],
        },
        transactions,
        signature: Vec::new(),
    }
}
