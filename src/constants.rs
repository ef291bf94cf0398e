//! Global constants for the consensus and settlement engine.
//!
//! Centralizes the network-governed parameters named in §6 of the protocol
//! so no magic number is duplicated across the scheduler, quorum selector,
//! and settlement modules.

use crate::network_type::NetworkType;

/// Per-chain consensus and quorum parameters (§4.2, §4.4, §4.9).
#[derive(Debug, Clone, Copy)]
pub struct NetworkParams {
    /// Minimum spacing between block timestamps, seconds.
    pub target_spacing: i64,
    /// How long the primary slot (slot 0) gets before fallback begins, seconds.
    pub leader_timeout: i64,
    /// Width of each fallback slot after `leader_timeout`, seconds.
    pub fallback_window: i64,
    /// Block timestamps are aligned to a multiple of this, seconds.
    pub slot_length: i64,
    /// Heights at or below this use the bootstrap exception (§4.2).
    pub bootstrap_height: u64,
    /// Cold-start override for the sync gate (§4.9), seconds.
    pub stale_chain_timeout: i64,
    /// Number of unique operators in a finality quorum (§4.4).
    pub quorum_size: usize,
    /// Minimum masternode-signature count for finality (§4.5, §4.6).
    pub quorum_threshold: usize,
    /// Height span of one quorum rotation cycle (§4.4).
    pub rotation_length: u64,
    /// Reorgs may not unseat an ancestor deeper than this (§4.6, §5).
    pub max_reorg_depth: u64,
    /// Blocks a collateral outpoint must mature before its MN is eligible to vote.
    pub vote_maturity_blocks: u64,
    /// Minimum per-kilobyte fee rate accepted by UNLOCK / TRANSFER_M1.
    pub min_fee_rate: u64,
    /// Peer best-header lead beyond which the node declares itself not synced.
    pub peer_height_tolerance: u64,
    /// Legacy HTLC-create escape hatch cutoff height (§4.7, Open Questions).
    /// `None` disables the escape hatch entirely — the recommended setting
    /// for any network without pre-existing legacy blocks below a cutoff.
    pub legacy_htlc_cutoff_height: Option<u64>,
}

pub const MAINNET_PARAMS: NetworkParams = NetworkParams {
    target_spacing: 60,
    leader_timeout: 45,
    fallback_window: 20,
    slot_length: 5,
    bootstrap_height: 1_000,
    stale_chain_timeout: 3 * 3600,
    quorum_size: 12,
    quorum_threshold: 8,
    rotation_length: 288, // ~1 day at 5 min effective cadence with fallback slack
    max_reorg_depth: 100,
    vote_maturity_blocks: 100,
    min_fee_rate: 1_000,
    peer_height_tolerance: 12,
    legacy_htlc_cutoff_height: None,
};

pub const TESTNET_PARAMS: NetworkParams = NetworkParams {
    target_spacing: 60,
    leader_timeout: 45,
    fallback_window: 20,
    slot_length: 5,
    bootstrap_height: 50,
    stale_chain_timeout: 3600,
    quorum_size: 3,
    quorum_threshold: 2,
    rotation_length: 48,
    max_reorg_depth: 100,
    vote_maturity_blocks: 10,
    min_fee_rate: 500,
    peer_height_tolerance: 24,
    legacy_htlc_cutoff_height: Some(25),
};

pub const REGTEST_PARAMS: NetworkParams = NetworkParams {
    target_spacing: 5,
    leader_timeout: 5,
    fallback_window: 2,
    slot_length: 1,
    bootstrap_height: 5,
    stale_chain_timeout: 600,
    quorum_size: 1,
    quorum_threshold: 1,
    rotation_length: 10,
    max_reorg_depth: 50,
    vote_maturity_blocks: 1,
    min_fee_rate: 1,
    peer_height_tolerance: 100,
    legacy_htlc_cutoff_height: None,
};

impl NetworkType {
    pub fn params(&self) -> &'static NetworkParams {
        match self {
            NetworkType::Mainnet => &MAINNET_PARAMS,
            NetworkType::Testnet => &TESTNET_PARAMS,
            NetworkType::Regtest => &REGTEST_PARAMS,
        }
    }
}

/// Settlement-layer constants, independent of network (§4.7).
pub mod settlement {
    /// Fallback minimum fee (satoshi-equivalent M1 units) when the caller
    /// doesn't supply a fee-rate-derived minimum.
    pub const MIN_FEE_FLOOR: u64 = 1;

    /// `ComputeMinFee` per §8 property 3: a flat per-byte rate over the
    /// encoded transaction size, floored at `MIN_FEE_FLOOR`.
    pub fn compute_min_fee(tx_size_bytes: usize, min_fee_rate: u64) -> u64 {
        let fee = (tx_size_bytes as u64).saturating_mul(min_fee_rate) / 1000;
        fee.max(MIN_FEE_FLOOR)
    }
}

/// Masternode registry constants (§4.1).
pub mod registry {
    /// PoSe penalty score at or above which a masternode is auto-banned.
    pub const POSE_BAN_CEILING: u32 = 100;
    /// Penalty increment applied for a detected double-sign (§4.11).
    pub const DOUBLE_SIGN_PENALTY: u32 = 100;
    /// Penalty increment applied for being skipped in favor of a lower-scored
    /// producer (§4.3's optional skipped-slot reporting).
    pub const SKIPPED_SLOT_PENALTY: u32 = 1;
}

/// Finality aggregator constants (§4.5, §5).
pub mod finality {
    /// Per-peer signature rate limit window, seconds.
    pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;
    /// Signatures accepted per peer per window.
    pub const RATE_LIMIT_MAX_PER_WINDOW: u32 = 100;
    /// Blocks older than this are eligible for signature-cache cleanup once final.
    pub const KEEP_BLOCKS: u64 = 100;
    /// Maximum tolerated clock drift for an incoming block's timestamp (§4.3).
    pub const MAX_FUTURE_DRIFT_SECS: i64 = 120;
}

/// Slashing / double-sign window constants (§4.11).
pub mod slashing {
    pub const WINDOW_HEIGHTS: u64 = 100;
    pub const CLEANUP_INTERVAL_HEIGHTS: u64 = 50;
}
