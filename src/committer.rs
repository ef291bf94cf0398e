//! C8 — Atomic Multi-DB Committer (§4.8).
//!
//! A block's settlement effects are staged entirely in-memory via
//! [`SettlementOverlay`]/[`HtlcOverlay`], checked against A5/A6, and only
//! then flushed to `sled` in the fixed order the spec lays out: Settlement,
//! then the opaque BTC-headers/Burn-claim collaborators, then each store's
//! own best-block marker, then the single all-committed marker last. A
//! crash between any two of those steps leaves the per-DB markers disagreeing
//! with the all-committed marker, which [`Stores::detect_torn_commit`]
//! catches at startup.

use crate::settlement::overlay::{HtlcOverlay, SettlementOverlay};
use crate::settlement::{SettlementEngine, SettlementError};
use crate::storage::{CommitParticipant, Stores};
use crate::types::{Hash256, OutPoint, SettlementSnapshot, SpecialTxType, Transaction};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::error::StorageError),

    #[error("invariant violated after staging: {0}")]
    Invariant(String),
}

impl CommitError {
    pub fn reject_kind(&self) -> crate::error::RejectKind {
        use crate::error::RejectKind;
        match self {
            CommitError::Settlement(e) => e.reject_kind(),
            CommitError::Storage(_) => RejectKind::Transient,
            CommitError::Invariant(_) => RejectKind::Conservation,
        }
    }
}

fn apply_delta(base: u64, delta: i128) -> Result<u64, CommitError> {
    let result = base as i128 + delta;
    if result < 0 {
        return Err(CommitError::Invariant(format!(
            "balance would go negative: base {base} delta {delta}"
        )));
    }
    Ok(result as u64)
}

/// Drives one block through staging, invariant-checking and the fixed
/// commit order. Holds no per-block state itself — every call takes the
/// block it is committing or undoing.
pub struct AtomicCommitter {
    stores: Arc<Stores>,
    settlement_engine: SettlementEngine,
}

impl AtomicCommitter {
    pub fn new(stores: Arc<Stores>, settlement_engine: SettlementEngine) -> Self {
        Self {
            stores,
            settlement_engine,
        }
    }

    /// Stages `txs`, checks A6 (`m0_vaulted == m1_supply`) against the
    /// resulting snapshot, and — only if that holds — commits in the fixed
    /// order. `burnclaims_block` is the amount of M0 newly minted this block
    /// by the burn-claim collaborator; it is opaque here, just folded into
    /// the running total-supply figure carried in the snapshot.
    pub fn commit_block(
        &self,
        txs: &[Transaction],
        height: u64,
        block_hash: Hash256,
        burnclaims_block: u64,
    ) -> Result<SettlementSnapshot, CommitError> {
        let prev = self
            .stores
            .settlement
            .get_snapshot(height.saturating_sub(1))?
            .unwrap_or_default();

        let mut overlay = SettlementOverlay::new();
        let mut htlc_overlay = HtlcOverlay::new();
        let (m0_delta, m1_delta) = self.settlement_engine.process_block(
            txs,
            height,
            &mut overlay,
            &mut htlc_overlay,
        )?;

        let m0_vaulted = apply_delta(prev.m0_vaulted, m0_delta)?;
        let m1_supply = apply_delta(prev.m1_supply, m1_delta)?;
        if m0_vaulted != m1_supply {
            return Err(CommitError::Invariant(format!(
                "A6 backing invariant failed at height {height}: m0_vaulted {m0_vaulted} != m1_supply {m1_supply}"
            )));
        }

        let snapshot = SettlementSnapshot {
            m0_vaulted,
            m1_supply,
            m0_shielded: prev.m0_shielded,
            m0_total_supply: prev.m0_total_supply + burnclaims_block,
            burnclaims_block,
            height,
            block_hash,
        };

        // Fixed commit order (§4.8): Settlement, then the opaque
        // BTC-headers/Burn-claim collaborators (their own content is
        // maintained elsewhere; only their best-block markers move here),
        // then every store's best-block marker, then all-committed last.
        overlay.commit(&self.stores.settlement)?;
        htlc_overlay.commit(&self.stores.htlc)?;
        self.stores.settlement.put_snapshot(&snapshot)?;

        self.stores.btc_headers.set_best_block_height(height)?;
        self.stores.burn_claim.set_best_block_height(height)?;
        self.stores.settlement.set_best_block_height(height)?;
        self.stores.htlc.set_best_block_height(height)?;
        self.stores.finality.set_best_block_height(height)?;

        self.stores.settlement.set_all_committed_height(height)?;

        info!(
            height,
            m0_vaulted = snapshot.m0_vaulted,
            m1_supply = snapshot.m1_supply,
            "block committed"
        );
        Ok(snapshot)
    }

    /// Reverses a previously committed block's settlement/HTLC effects
    /// in-place against the live stores (not an overlay — this runs after
    /// the block has already been unseated by the reorg handler, so there
    /// is nothing left to stage against). Walks transactions in reverse so
    /// a later TX's consumption of an earlier TX's output unwinds first.
    pub fn undo_block(&self, txs: &[Transaction], height: u64) -> Result<(), CommitError> {
        for tx in txs.iter().rev() {
            let Some(special_type) = tx.special_type() else {
                continue;
            };
            let txid = tx.txid();
            match special_type {
                SpecialTxType::Lock => {
                    self.stores.settlement.remove_vault(&OutPoint::new(txid, 0))?;
                    self.stores.settlement.remove_receipt(&OutPoint::new(txid, 1))?;
                }
                SpecialTxType::Unlock => {
                    if let Some(undo) = self.stores.settlement.take_unlock_undo(&txid)? {
                        for r in &undo.spent_receipts {
                            self.stores.settlement.put_receipt(r)?;
                        }
                        for v in &undo.spent_vaults {
                            self.stores.settlement.put_vault(v)?;
                        }
                        for op in &undo.change_receipts {
                            self.stores.settlement.remove_receipt(op)?;
                        }
                        if let Some(op) = undo.fee_receipt {
                            self.stores.settlement.remove_receipt(&op)?;
                        }
                        if let Some(op) = undo.fee_vault {
                            self.stores.settlement.remove_vault(&op)?;
                        }
                        if let Some(op) = undo.vault_change {
                            self.stores.settlement.remove_vault(&op)?;
                        }
                    } else {
                        warn!(height, ?txid, "missing UNLOCK undo record during rollback");
                    }
                }
                SpecialTxType::TransferM1 => {
                    if let Some(undo) = self.stores.settlement.take_transfer_undo(&txid)? {
                        for i in 0..undo.recipient_count as u32 {
                            self.stores.settlement.remove_receipt(&OutPoint::new(txid, i))?;
                        }
                        self.stores.settlement.remove_receipt(&undo.fee_receipt)?;
                        self.stores.settlement.put_receipt(&undo.original_receipt)?;
                    } else {
                        warn!(height, ?txid, "missing TRANSFER_M1 undo record during rollback");
                    }
                }
                SpecialTxType::HtlcCreate => {
                    if let Some(undo) = self.stores.htlc.take_create_undo(&txid)? {
                        self.stores.settlement.put_receipt(&undo.consumed_receipt)?;
                    }
                    let outpoint = OutPoint::new(txid, 0);
                    if let Some(record) = self.stores.htlc.get(&outpoint)? {
                        self.stores.htlc.erase_hashlock_index(&record.hashlock)?;
                    }
                    self.stores.htlc.remove(&outpoint)?;
                }
                SpecialTxType::HtlcCreate3s => {
                    if let Some(undo) = self.stores.htlc.take_create_undo(&txid)? {
                        self.stores.settlement.put_receipt(&undo.consumed_receipt)?;
                    }
                    let outpoint = OutPoint::new(txid, 0);
                    if let Some(record) = self.stores.htlc.get_3s(&outpoint)? {
                        for (slot, hashlock) in record.hashlocks.iter().enumerate() {
                            self.stores
                                .htlc
                                .erase_hashlock_index_slot(slot as u8, hashlock)?;
                        }
                    }
                    self.stores.htlc.remove_3s(&outpoint)?;
                }
                SpecialTxType::HtlcClaim | SpecialTxType::HtlcRefund => {
                    if let Some(undo) = self.stores.htlc.take_resolve_undo(&txid)? {
                        self.stores.settlement.remove_receipt(&OutPoint::new(txid, 0))?;
                        // A covenant claim may have minted a follow-up HTLC
                        // at this outpoint instead of a receipt; drop either,
                        // erasing its hashlock index first (mirrors the
                        // HtlcCreate undo arm above).
                        let outpoint = OutPoint::new(txid, 0);
                        if let Some(record) = self.stores.htlc.get(&outpoint)? {
                            self.stores.htlc.erase_hashlock_index(&record.hashlock)?;
                        }
                        self.stores.htlc.remove(&outpoint)?;
                        self.stores.htlc.put(&undo.pre_resolve)?;
                    } else {
                        warn!(height, ?txid, "missing HTLC resolve undo during rollback");
                    }
                }
                SpecialTxType::HtlcClaim3s | SpecialTxType::HtlcRefund3s => {
                    if let Some(undo) = self.stores.htlc.take_resolve_undo_3s(&txid)? {
                        self.stores.settlement.remove_receipt(&OutPoint::new(txid, 0))?;
                        self.stores.htlc.put_3s(&undo.pre_resolve)?;
                    } else {
                        warn!(height, ?txid, "missing 3s HTLC resolve undo during rollback");
                    }
                }
                _ => {}
            }
        }
        let prev_height = height.saturating_sub(1);
        self.stores.settlement.set_best_block_height(prev_height)?;
        self.stores.htlc.set_best_block_height(prev_height)?;
        self.stores.btc_headers.set_best_block_height(prev_height)?;
        self.stores.burn_claim.set_best_block_height(prev_height)?;
        self.stores.finality.set_best_block_height(prev_height)?;
        self.stores.settlement.set_all_committed_height(prev_height)?;
        Ok(())
    }

    pub fn crash_recovery_required(&self) -> Result<bool, CommitError> {
        Ok(self.stores.detect_torn_commit()?)
    }

    /// §4.8 rebuild-from-chain: wipe the settlement and HTLC stores and
    /// replay every block from genesis, re-deriving state without
    /// re-validating block/signature rules (the chain itself was already
    /// accepted; this only rebuilds the settlement projection of it).
    /// `fetch_block` returns `(transactions, block_hash, burnclaims_block)`
    /// for a height, or `None` once the tip is passed.
    pub fn rebuild_from_chain<F>(&self, tip_height: u64, mut fetch_block: F) -> Result<(), CommitError>
    where
        F: FnMut(u64) -> Option<(Vec<Transaction>, Hash256, u64)>,
    {
        warn!(tip_height, "rebuilding settlement state from chain");
        self.stores.settlement.wipe()?;
        self.stores.htlc.wipe()?;
        self.stores.settlement.put_snapshot(&SettlementSnapshot::default())?;

        for height in 1..=tip_height {
            match fetch_block(height) {
                Some((txs, block_hash, burnclaims_block)) => {
                    self.commit_block(&txs, height, block_hash, burnclaims_block)?;
                }
                None => break,
            }
        }
        info!("rebuild-from-chain complete");
        Ok(())
    }
}
