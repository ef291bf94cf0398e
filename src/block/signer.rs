//! C3 — Block Signer.
//!
//! Signs a block's content hash with the local operator key once the
//! scheduler (§4.2) has decided this process is the expected producer.

use crate::block::types::Block;
use crate::crypto::OperatorKeypair;

pub fn sign_block(block: &mut Block, keypair: &OperatorKeypair) {
    let hash = block.hash();
    block.signature = keypair.sign_block_hash(&hash);
}
