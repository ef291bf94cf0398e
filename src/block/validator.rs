//! C3 — Block Verifier.
//!
//! Verifies that an incoming block was signed by the masternode the
//! scheduler formula (§4.2) selects for the block's own timestamp. Producer
//! choice is thus coupled to block time: a verifier never trusts its own
//! wall clock for anything beyond the future-drift check.

use crate::block::types::Block;
use crate::constants::NetworkParams;
use crate::crypto::{self, CryptoError};
use crate::masternode_registry::MasternodeRegistry;
use crate::scheduler::{self, SchedulerError};
use crate::types::MnId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("block timestamp {ts} exceeds now+120s ({bound})")]
    TimestampTooFarInFuture { ts: i64, bound: i64 },
    #[error("block timestamp is not slot-aligned")]
    NotSlotAligned,
    #[error("scheduler rejected block timing: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("producer masternode unknown or invalid")]
    UnknownProducer,
    #[error("signature check failed: {0}")]
    Signature(#[from] CryptoError),
    #[error("producer field in header does not match recomputed expected producer")]
    ProducerMismatch,
}

pub const MAX_FUTURE_DRIFT_SECS: i64 = 120;

pub struct VerifiedBlock {
    /// MN ids with a higher score than the producer that were passed over
    /// for this slot — input to PoSe penalty accrual (§4.3).
    pub skipped: Vec<MnId>,
}

/// Full block verification, including the optional skipped-slot report.
pub fn verify_block(
    block: &Block,
    prev_timestamp: i64,
    prev_block_hash: &[u8; 32],
    registry: &MasternodeRegistry,
    params: &NetworkParams,
    now: i64,
) -> Result<VerifiedBlock, ValidationError> {
    if block.header.timestamp > now + MAX_FUTURE_DRIFT_SECS {
        return Err(ValidationError::TimestampTooFarInFuture {
            ts: block.header.timestamp,
            bound: now + MAX_FUTURE_DRIFT_SECS,
        });
    }

    let (slot, aligned_time) = scheduler::compute_slot(prev_timestamp, block.header.timestamp, params)?;
    if aligned_time != block.header.timestamp {
        return Err(ValidationError::NotSlotAligned);
    }

    let next_height = block.header.height;
    let bootstrap = next_height <= params.bootstrap_height;
    let candidates = scheduler::eligible_candidates(registry, next_height, params);
    if candidates.is_empty() {
        return Err(ValidationError::UnknownProducer);
    }
    let sorted = scheduler::sorted_candidates(prev_block_hash, next_height, candidates);
    let effective_slot = if bootstrap { 0 } else { slot as usize % sorted.len() };
    let expected = sorted[effective_slot];

    if expected != block.header.producer_mn_id {
        return Err(ValidationError::ProducerMismatch);
    }

    let record = registry
        .get_valid(&expected)
        .ok_or(ValidationError::UnknownProducer)?;

    crypto::verify_block_signature(&record.operator_pubkey, &block.hash(), &block.signature)?;

    let skipped = sorted
        .iter()
        .take(effective_slot.min(sorted.len()))
        .copied()
        .collect();

    Ok(VerifiedBlock { skipped })
}
