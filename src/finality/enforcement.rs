//! C6 — Finality Enforcement (§4.6).
//!
//! A block is final once its [`FinalityRecord`] reaches `quorum_threshold`
//! distinct MN signatures. Once final, the chain commits to it: no
//! conflicting block may be inserted at the same height, and no reorg whose
//! fork point lies at or below a final ancestor may proceed. This module is
//! the single source of truth other components (the committer, the P2P
//! block-acceptance path) consult before acting on a height that might
//! already be settled.

use crate::storage::FinalityDb;
use crate::types::Hash256;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnforcementError {
    #[error("height {height} is already final with a different block hash")]
    ConflictsWithFinal { height: u64 },
    #[error("reorg fork point {fork_height} is at or below final height {final_height}")]
    ReorgBelowFinal { fork_height: u64, final_height: u64 },
}

/// Tracks which heights are final and with which block hash. Rehydrated at
/// boot from [`FinalityDb`] so production/voting can resume without
/// re-collecting signatures for already-final blocks.
pub struct FinalityEnforcer {
    final_blocks: RwLock<BTreeMap<u64, Hash256>>,
}

impl FinalityEnforcer {
    pub fn new() -> Self {
        Self {
            final_blocks: RwLock::new(BTreeMap::new()),
        }
    }

    /// §4.6 boot-time recovery: scan the finality DB and mark every record
    /// that already met `quorum_threshold` as final.
    pub fn hydrate(db: &FinalityDb, quorum_threshold: usize) -> Self {
        let enforcer = Self::new();
        for record in db.iter_all() {
            if record.count() >= quorum_threshold {
                enforcer
                    .final_blocks
                    .write()
                    .insert(record.height, record.block_hash);
            }
        }
        if let Some((height, _)) = enforcer.final_blocks.read().iter().next_back() {
            info!(height, "finality enforcer hydrated from finality DB");
        }
        enforcer
    }

    /// Mark `height`/`block_hash` final now that its signature count has
    /// crossed `quorum_threshold` (called by the aggregator on threshold).
    pub fn mark_final(&self, height: u64, block_hash: Hash256) {
        self.final_blocks.write().insert(height, block_hash);
    }

    pub fn is_final(&self, height: u64) -> bool {
        self.final_blocks.read().contains_key(&height)
    }

    pub fn final_hash_at(&self, height: u64) -> Option<Hash256> {
        self.final_blocks.read().get(&height).copied()
    }

    pub fn last_finalized_height(&self) -> Option<u64> {
        self.final_blocks.read().keys().next_back().copied()
    }

    /// §4.6(a): reject inserting a conflicting block at an already-final height.
    pub fn check_new_block(&self, height: u64, block_hash: &Hash256) -> Result<(), EnforcementError> {
        if let Some(final_hash) = self.final_hash_at(height) {
            if &final_hash != block_hash {
                return Err(EnforcementError::ConflictsWithFinal { height });
            }
        }
        Ok(())
    }

    /// §4.6(b): reject a reorg whose fork point requires unseating a final
    /// ancestor. `fork_height` is the height of the last common ancestor
    /// between the current chain and the candidate fork.
    pub fn check_reorg(&self, fork_height: u64) -> Result<(), EnforcementError> {
        if let Some(final_height) = self.last_finalized_height() {
            if fork_height <= final_height {
                return Err(EnforcementError::ReorgBelowFinal {
                    fork_height,
                    final_height,
                });
            }
        }
        Ok(())
    }
}

impl Default for FinalityEnforcer {
    fn default() -> Self {
        Self::new()
    }
}
