//! C2 — Block Producer Scheduler.
//!
//! Given the previous block and wall-clock time, decides whether a
//! locally-managed masternode is the expected producer for the next block,
//! and what the canonical (slot-aligned) block timestamp is. The alignment
//! step is a hard invariant (§9): the verifier (§4.3) recomputes the
//! expected producer from exactly the timestamp written into the block, so
//! a drift here silently breaks every downstream signature check.

use crate::block::types::BlockHeader;
use crate::constants::NetworkParams;
use crate::masternode_registry::MasternodeRegistry;
use crate::types::MnId;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("too early: now < minimum block time")]
    TooEarly,
    #[error("no eligible masternodes")]
    NoCandidates,
    #[error("height already produced locally")]
    AlreadyProduced,
}

/// The outcome of one scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerDecision {
    pub slot: u64,
    pub aligned_time: i64,
    pub producer_id: MnId,
    pub is_local_producer: bool,
}

fn div_floor(value: i64, divisor: i64) -> i64 {
    value.div_euclid(divisor)
}

fn align_floor(time: i64, slot_length: i64) -> i64 {
    div_floor(time, slot_length) * slot_length
}

fn align_ceil(time: i64, slot_length: i64) -> i64 {
    let floored = align_floor(time, slot_length);
    if floored == time {
        floored
    } else {
        floored + slot_length
    }
}

/// Computes which slot `now` falls into relative to `prev_time`, and the
/// slot-aligned timestamp that must be written into the block header (§4.2).
pub fn compute_slot(
    prev_time: i64,
    now: i64,
    params: &NetworkParams,
) -> Result<(u64, i64), SchedulerError> {
    let min_t = prev_time + params.target_spacing;
    if now < min_t {
        return Err(SchedulerError::TooEarly);
    }
    let dt = now - min_t;
    if dt < params.leader_timeout {
        let aligned = align_floor(min_t, params.slot_length);
        Ok((0, aligned))
    } else {
        let extra = dt - params.leader_timeout;
        let slot = 1 + (extra / params.fallback_window) as u64;
        let slot = slot.min(360);
        let raw = min_t + params.leader_timeout + (slot as i64 - 1) * params.fallback_window;
        let aligned = align_ceil(raw, params.slot_length);
        Ok((slot, aligned))
    }
}

/// `SHA256(prev_block_hash ∥ next_height ∥ mn_id)`, the deterministic
/// per-MN score for a given height (§4.2).
pub fn producer_score(prev_block_hash: &[u8; 32], next_height: u64, mn_id: &MnId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_block_hash);
    hasher.update(next_height.to_le_bytes());
    hasher.update(mn_id);
    hasher.finalize().into()
}

/// Sorts candidate MN ids descending by score, ties broken lexicographically
/// by MN id, for deterministic slot assignment.
pub fn sorted_candidates(prev_block_hash: &[u8; 32], next_height: u64, mut candidates: Vec<MnId>) -> Vec<MnId> {
    candidates.sort_by(|a, b| {
        let sa = producer_score(prev_block_hash, next_height, a);
        let sb = producer_score(prev_block_hash, next_height, b);
        sb.cmp(&sa).then_with(|| a.cmp(b))
    });
    candidates
}

/// Expected producer for a given slot. `bootstrap` forces slot 0 regardless
/// of the requested slot, per the §4.2 bootstrap exception.
pub fn expected_producer(
    prev_block_hash: &[u8; 32],
    next_height: u64,
    candidates: Vec<MnId>,
    slot: u64,
    bootstrap: bool,
) -> Result<MnId, SchedulerError> {
    if candidates.is_empty() {
        return Err(SchedulerError::NoCandidates);
    }
    let sorted = sorted_candidates(prev_block_hash, next_height, candidates);
    let effective_slot = if bootstrap { 0 } else { slot };
    Ok(sorted[(effective_slot as usize) % sorted.len()])
}

/// Candidate set for a given height: confirmed + valid MNs outside the
/// bootstrap window, every valid MN (confirmation not required) inside it.
pub fn eligible_candidates(registry: &MasternodeRegistry, next_height: u64, params: &NetworkParams) -> Vec<MnId> {
    let bootstrap = next_height <= params.bootstrap_height;
    let mut out = Vec::new();
    registry.for_each(true, |record| {
        if bootstrap || record.is_confirmed_at(next_height.saturating_sub(1)) {
            out.push(record.mn_id);
        }
    });
    out
}

/// Tracks the last height this process produced a block for, preventing
/// double production from a single scheduler tick racing a late poll (§4.2).
pub struct ProductionGuard {
    last_produced_height: AtomicU64,
}

impl ProductionGuard {
    pub fn new() -> Self {
        Self {
            last_produced_height: AtomicU64::new(0),
        }
    }

    pub fn try_claim(&self, height: u64) -> Result<(), SchedulerError> {
        let prev = self.last_produced_height.fetch_max(height, Ordering::SeqCst);
        if prev >= height {
            return Err(SchedulerError::AlreadyProduced);
        }
        Ok(())
    }
}

impl Default for ProductionGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate whether a locally-managed MN should produce the next block.
pub fn decide(
    prev_header: &BlockHeader,
    prev_block_hash: &[u8; 32],
    now: i64,
    registry: &MasternodeRegistry,
    local_mn_ids: &[MnId],
    params: &NetworkParams,
) -> Result<ProducerDecision, SchedulerError> {
    let next_height = prev_header.height + 1;
    let (slot, aligned_time) = compute_slot(prev_header.timestamp, now, params)?;
    let bootstrap = next_height <= params.bootstrap_height;
    let candidates = eligible_candidates(registry, next_height, params);
    let producer_id = expected_producer(prev_block_hash, next_height, candidates, slot, bootstrap)?;
    let is_local_producer = local_mn_ids.contains(&producer_id);
    Ok(ProducerDecision {
        slot,
        aligned_time,
        producer_id,
        is_local_producer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REGTEST_PARAMS;

    #[test]
    fn primary_slot_before_leader_timeout() {
        let params = REGTEST_PARAMS;
        let prev_time = 1_000_000i64;
        let now = prev_time + params.target_spacing + 1;
        let (slot, aligned) = compute_slot(prev_time, now, &params).unwrap();
        assert_eq!(slot, 0);
        assert!(aligned >= prev_time + params.target_spacing);
    }

    #[test]
    fn too_early_rejected() {
        let params = REGTEST_PARAMS;
        let prev_time = 1_000_000i64;
        let err = compute_slot(prev_time, prev_time, &params).unwrap_err();
        assert_eq!(err, SchedulerError::TooEarly);
    }

    #[test]
    fn fallback_slot_advances_at_boundary() {
        let mut params = REGTEST_PARAMS;
        params.leader_timeout = 45;
        params.fallback_window = 20;
        params.slot_length = 1;
        let prev_time = 0i64;
        let min_t = prev_time + params.target_spacing;

        let (slot_before, _) = compute_slot(prev_time, min_t + params.leader_timeout - 1, &params).unwrap();
        assert_eq!(slot_before, 0);

        let (slot_at, _) = compute_slot(prev_time, min_t + params.leader_timeout, &params).unwrap();
        assert_eq!(slot_at, 1);

        let (slot_next, _) =
            compute_slot(prev_time, min_t + params.leader_timeout + params.fallback_window, &params).unwrap();
        assert_eq!(slot_next, 2);
    }

    #[test]
    fn slot_clamps_at_360() {
        let mut params = REGTEST_PARAMS;
        params.fallback_window = 1;
        params.leader_timeout = 0;
        let prev_time = 0i64;
        let min_t = prev_time + params.target_spacing;
        let (slot, _) = compute_slot(prev_time, min_t + 10_000, &params).unwrap();
        assert_eq!(slot, 360);
    }

    #[test]
    fn producer_score_is_deterministic() {
        let hash = [7u8; 32];
        let a = producer_score(&hash, 10, &[1u8; 32]);
        let b = producer_score(&hash, 10, &[1u8; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn production_guard_rejects_repeat_height() {
        let guard = ProductionGuard::new();
        guard.try_claim(5).unwrap();
        assert_eq!(guard.try_claim(5).unwrap_err(), SchedulerError::AlreadyProduced);
        assert_eq!(guard.try_claim(4).unwrap_err(), SchedulerError::AlreadyProduced);
        guard.try_claim(6).unwrap();
    }
}
