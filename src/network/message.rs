//! The minimal P2P message envelope (SPEC_FULL.md supplemental features).
//! §6 calls for one new message type for finality signatures; the rest of
//! the envelope is the bare minimum a node needs to bootstrap a peer
//! connection and exchange block/finality gossip.

use crate::types::{FinalitySignature, Hash256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetworkMessage {
    /// First message on a new connection; peers with a mismatched `magic`
    /// or incompatible `protocol_version` are disconnected immediately.
    Handshake {
        magic: [u8; 4],
        protocol_version: u32,
        network: String,
    },

    GetChainTip,
    ChainTipResponse {
        height: u64,
        hash: Hash256,
    },

    /// Announce a newly produced/accepted block by hash; peers missing it
    /// request the full block out of band (full block-fetch framing is out
    /// of scope, §1).
    BlockAnnouncement {
        height: u64,
        hash: Hash256,
    },

    /// §6's one required new message type: gossip a finality signature.
    FinalitySignatureGossip(FinalitySignature),
}
