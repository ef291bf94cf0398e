//! C7 — Settlement State Machine: LOCK / UNLOCK / TRANSFER_M1 and the HTLC
//! family (§4.7). Operates purely against the in-memory staging overlays
//! from [`overlay`] so the atomic committer (C8) can verify A5/A6 before a
//! single write reaches `sled`.

pub mod htlc;
pub mod overlay;
pub mod payloads;

use crate::constants::settlement::compute_min_fee;
use crate::storage::{HtlcStore, SettlementStore};
use crate::types::{OutPoint, Receipt, SpecialTxType, Transaction, TransferUndo, UnlockUndo, Vault};
use overlay::{HtlcOverlay, SettlementOverlay};
use payloads::UnlockPayload;
use std::sync::Arc;
use thiserror::Error;

pub use htlc::HtlcError;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::StorageError),
    #[error("malformed special payload: {0}")]
    MalformedPayload(String),
    #[error("canonical order violation: {0}")]
    CanonicalOrder(String),
    #[error("conservation violated: {0}")]
    Conservation(String),
    #[error("unknown input outpoint: {0:?}")]
    UnknownInput(OutPoint),
    #[error("fee below minimum: got {got}, required {required}")]
    FeeTooLow { got: u64, required: u64 },
    #[error("htlc error: {0}")]
    Htlc(#[from] HtlcError),
}

impl SettlementError {
    /// Which §7 reject bucket this error falls into, for DoS scoring.
    pub fn reject_kind(&self) -> crate::error::RejectKind {
        use crate::error::RejectKind;
        match self {
            SettlementError::Storage(_) => RejectKind::Transient,
            SettlementError::MalformedPayload(_) => RejectKind::Structural,
            SettlementError::CanonicalOrder(_) => RejectKind::Policy,
            SettlementError::FeeTooLow { .. } => RejectKind::Policy,
            SettlementError::Conservation(_) => RejectKind::Conservation,
            SettlementError::UnknownInput(_) => RejectKind::Conservation,
            SettlementError::Htlc(e) => e.reject_kind(),
        }
    }
}

fn encoded_size(tx: &Transaction) -> usize {
    bincode::serialize(tx).map(|b| b.len()).unwrap_or(0)
}

/// Applies settlement special transactions against staging overlays.
/// Holds no mutable state of its own; every call takes the overlays that
/// accumulate one block's worth of changes.
pub struct SettlementEngine {
    pub(crate) settlement: Arc<SettlementStore>,
    pub(crate) htlc: Arc<HtlcStore>,
    min_fee_rate: u64,
    legacy_htlc_cutoff_height: Option<u64>,
}

impl SettlementEngine {
    pub fn new(
        settlement: Arc<SettlementStore>,
        htlc: Arc<HtlcStore>,
        min_fee_rate: u64,
        legacy_htlc_cutoff_height: Option<u64>,
    ) -> Self {
        Self {
            settlement,
            htlc,
            min_fee_rate,
            legacy_htlc_cutoff_height,
        }
    }

    pub(crate) fn legacy_htlc_cutoff_height(&self) -> Option<u64> {
        self.legacy_htlc_cutoff_height
    }

    /// Applies every settlement/HTLC special transaction in `txs` (in block
    /// order, per §5's ordering guarantee) against `overlay`/`htlc_overlay`,
    /// returning the net `(m0_vaulted_delta, m1_supply_delta)` for the block.
    /// Non-settlement special types (register, burn-claim, ...) are skipped;
    /// they are handled by their own components.
    pub fn process_block(
        &self,
        txs: &[Transaction],
        height: u64,
        overlay: &mut SettlementOverlay,
        htlc_overlay: &mut HtlcOverlay,
    ) -> Result<(i128, i128), SettlementError> {
        let mut m0_delta = 0i128;
        let mut m1_delta = 0i128;
        for tx in txs {
            let Some(special_type) = tx.special_type() else {
                continue;
            };
            match special_type {
                SpecialTxType::Lock => {
                    let (d0, d1) = self.apply_lock(tx, height, overlay)?;
                    m0_delta += d0;
                    m1_delta += d1;
                }
                SpecialTxType::Unlock => {
                    let (d0, d1) = self.apply_unlock(tx, height, overlay)?;
                    m0_delta += d0;
                    m1_delta += d1;
                }
                SpecialTxType::TransferM1 => {
                    self.apply_transfer(tx, height, overlay)?;
                }
                SpecialTxType::HtlcCreate => {
                    htlc::apply_htlc_create(self, tx, height, overlay, htlc_overlay)?;
                }
                SpecialTxType::HtlcClaim => {
                    htlc::apply_htlc_claim(self, tx, height, overlay, htlc_overlay)?;
                }
                SpecialTxType::HtlcRefund => {
                    htlc::apply_htlc_refund(self, tx, height, overlay, htlc_overlay)?;
                }
                SpecialTxType::HtlcCreate3s => {
                    htlc::apply_htlc_create_3s(self, tx, height, overlay, htlc_overlay)?;
                }
                SpecialTxType::HtlcClaim3s => {
                    htlc::apply_htlc_claim_3s(self, tx, height, overlay, htlc_overlay)?;
                }
                SpecialTxType::HtlcRefund3s => {
                    htlc::apply_htlc_refund_3s(self, tx, height, overlay, htlc_overlay)?;
                }
                _ => {}
            }
        }
        Ok((m0_delta, m1_delta))
    }

    /// `vout[0]` vault, `vout[1]` receipt, `vout[2+]` M0 change (untracked
    /// here — standard M0 accounting is a base-layer concern, §1 Non-goals).
    fn apply_lock(
        &self,
        tx: &Transaction,
        height: u64,
        overlay: &mut SettlementOverlay,
    ) -> Result<(i128, i128), SettlementError> {
        if tx.outputs.len() < 2 {
            return Err(SettlementError::CanonicalOrder(
                "LOCK requires a vault output and a receipt output".into(),
            ));
        }
        let vault_out = &tx.outputs[0];
        let receipt_out = &tx.outputs[1];
        if !vault_out.is_op_true() {
            return Err(SettlementError::CanonicalOrder(
                "LOCK vault output must be OP_TRUE".into(),
            ));
        }
        if vault_out.value == 0 || vault_out.value != receipt_out.value {
            return Err(SettlementError::Conservation(format!(
                "LOCK vault amount {} must equal receipt amount {} and be nonzero",
                vault_out.value, receipt_out.value
            )));
        }
        let txid = tx.txid();
        overlay.put_vault(Vault {
            outpoint: OutPoint::new(txid, 0),
            amount: vault_out.value,
            lock_height: height,
        });
        overlay.put_receipt(Receipt {
            outpoint: OutPoint::new(txid, 1),
            amount: receipt_out.value,
            create_height: height,
        });
        let amount = vault_out.value as i128;
        Ok((amount, amount))
    }

    /// Canonical input order: receipts first, then vaults. Canonical output
    /// order: `[m0_out, m1_change?, fee?, fee_vault_backing?, vault_change?]`.
    /// See `payloads::UnlockPayload` for why the optional slots are declared
    /// explicitly rather than inferred from output count.
    fn apply_unlock(
        &self,
        tx: &Transaction,
        height: u64,
        overlay: &mut SettlementOverlay,
    ) -> Result<(i128, i128), SettlementError> {
        let payload: UnlockPayload = match tx.special_payload() {
            Some(bytes) if !bytes.is_empty() => {
                bincode::deserialize(bytes).map_err(|e| SettlementError::MalformedPayload(e.to_string()))?
            }
            _ => UnlockPayload::default(),
        };

        let mut spent_receipts = Vec::new();
        let mut spent_vaults = Vec::new();
        let mut seen_vault = false;
        for input in &tx.inputs {
            let op = input.previous_output;
            if let Some(receipt) = overlay.get_receipt(&self.settlement, &op)? {
                if seen_vault {
                    return Err(SettlementError::CanonicalOrder(
                        "UNLOCK receipt input follows a vault input".into(),
                    ));
                }
                spent_receipts.push(receipt);
                continue;
            }
            if let Some(vault) = overlay.get_vault(&self.settlement, &op)? {
                seen_vault = true;
                spent_vaults.push(vault);
                continue;
            }
            return Err(SettlementError::UnknownInput(op));
        }
        if spent_receipts.is_empty() || spent_vaults.is_empty() {
            return Err(SettlementError::CanonicalOrder(
                "UNLOCK requires at least one receipt input and one vault input".into(),
            ));
        }
        let m1_in: u64 = spent_receipts.iter().map(|r| r.amount).sum();
        let vault_in: u64 = spent_vaults.iter().map(|v| v.amount).sum();

        let m0_out = tx
            .outputs
            .first()
            .ok_or_else(|| SettlementError::CanonicalOrder("UNLOCK requires at least one output".into()))?
            .value;
        if m0_out == 0 {
            return Err(SettlementError::Conservation(
                "UNLOCK released M0 output must be nonzero".into(),
            ));
        }

        let txid = tx.txid();
        let mut idx = 1usize;

        if let Some(change_amount) = payload.m1_change_amount {
            let out = tx.outputs.get(idx).ok_or_else(|| {
                SettlementError::CanonicalOrder("missing declared M1 change output".into())
            })?;
            if out.is_op_true() || out.value != change_amount {
                return Err(SettlementError::CanonicalOrder(
                    "M1 change output does not match declared layout".into(),
                ));
            }
            idx += 1;
        }

        let mut fee_receipt_outpoint = None;
        let mut fee_vault_outpoint = None;
        let m1_fee = payload.fee_amount.unwrap_or(0);
        if let Some(fee_amount) = payload.fee_amount {
            let min_fee = compute_min_fee(encoded_size(tx), self.min_fee_rate);
            if fee_amount < min_fee {
                return Err(SettlementError::FeeTooLow {
                    got: fee_amount,
                    required: min_fee,
                });
            }
            let fee_out = tx
                .outputs
                .get(idx)
                .ok_or_else(|| SettlementError::CanonicalOrder("missing declared fee output".into()))?;
            if !fee_out.is_op_true() || fee_out.value != fee_amount {
                return Err(SettlementError::CanonicalOrder(
                    "fee output must be a single OP_TRUE byte of the declared amount".into(),
                ));
            }
            fee_receipt_outpoint = Some(OutPoint::new(txid, idx as u32));
            idx += 1;

            let backing_out = tx.outputs.get(idx).ok_or_else(|| {
                SettlementError::Conservation("fee requires 1:1 vault backing output".into())
            })?;
            if !backing_out.is_op_true() || backing_out.value != fee_amount {
                return Err(SettlementError::Conservation(
                    "fee vault backing must equal the fee amount".into(),
                ));
            }
            fee_vault_outpoint = Some(OutPoint::new(txid, idx as u32));
            idx += 1;
        }

        let m1_change = payload.m1_change_amount.unwrap_or(0);
        if m1_in != m0_out + m1_change + m1_fee {
            return Err(SettlementError::Conservation(format!(
                "UNLOCK receipt conservation failed: {} != {} + {} + {}",
                m1_in, m0_out, m1_change, m1_fee
            )));
        }

        let mut vault_change_outpoint = None;
        if let Some(vault_change_amount) = payload.vault_change_amount {
            let out = tx.outputs.get(idx).ok_or_else(|| {
                SettlementError::CanonicalOrder("missing declared vault change output".into())
            })?;
            if !out.is_op_true() || out.value != vault_change_amount {
                return Err(SettlementError::CanonicalOrder(
                    "vault change output does not match declared layout".into(),
                ));
            }
            vault_change_outpoint = Some(OutPoint::new(txid, idx as u32));
            idx += 1;
        }
        let vault_change = payload.vault_change_amount.unwrap_or(0);
        if vault_in < m0_out + m1_fee {
            return Err(SettlementError::Conservation(
                "vault inputs insufficient to back released M0 and fee".into(),
            ));
        }
        if vault_in != m0_out + m1_fee + vault_change {
            return Err(SettlementError::Conservation("UNLOCK vault conservation failed".into()));
        }
        if idx != tx.outputs.len() {
            return Err(SettlementError::CanonicalOrder(
                "UNLOCK has unexpected trailing outputs".into(),
            ));
        }

        for r in &spent_receipts {
            overlay.remove_receipt(r.outpoint);
        }
        for v in &spent_vaults {
            overlay.remove_vault(v.outpoint);
        }

        let mut change_receipts = Vec::new();
        if let Some(change_amount) = payload.m1_change_amount {
            let op = OutPoint::new(txid, 1);
            overlay.put_receipt(Receipt {
                outpoint: op,
                amount: change_amount,
                create_height: height,
            });
            change_receipts.push(op);
        }
        if let (Some(fee_amount), Some(fee_op)) = (payload.fee_amount, fee_receipt_outpoint) {
            overlay.put_receipt(Receipt {
                outpoint: fee_op,
                amount: fee_amount,
                create_height: height,
            });
        }
        if let (Some(fee_amount), Some(backing_op)) = (payload.fee_amount, fee_vault_outpoint) {
            overlay.put_vault(Vault {
                outpoint: backing_op,
                amount: fee_amount,
                lock_height: height,
            });
        }
        if let (Some(vc_amount), Some(vc_op)) = (payload.vault_change_amount, vault_change_outpoint) {
            overlay.put_vault(Vault {
                outpoint: vc_op,
                amount: vc_amount,
                lock_height: height,
            });
        }

        overlay.push_unlock_undo(
            txid,
            UnlockUndo {
                spent_receipts,
                spent_vaults,
                m0_released: m0_out,
                m1_net_burned: m0_out,
                change_receipts,
                fee_receipt: fee_receipt_outpoint,
                fee_vault: fee_vault_outpoint,
                vault_change: vault_change_outpoint,
            },
        );

        Ok((-(m0_out as i128), -(m0_out as i128)))
    }

    /// Exactly one M1 receipt input; recipients followed by one OP_TRUE fee
    /// output at the final position. `m1_supply` is unchanged by this type.
    fn apply_transfer(
        &self,
        tx: &Transaction,
        height: u64,
        overlay: &mut SettlementOverlay,
    ) -> Result<(), SettlementError> {
        if tx.inputs.len() != 1 {
            return Err(SettlementError::CanonicalOrder(
                "TRANSFER_M1 requires exactly one input".into(),
            ));
        }
        let op = tx.inputs[0].previous_output;
        let receipt = overlay
            .get_receipt(&self.settlement, &op)?
            .ok_or(SettlementError::UnknownInput(op))?;
        if tx.outputs.is_empty() {
            return Err(SettlementError::CanonicalOrder(
                "TRANSFER_M1 requires at least a fee output".into(),
            ));
        }
        let (recipients, fee_slice) = tx.outputs.split_at(tx.outputs.len() - 1);
        let fee_out = &fee_slice[0];
        if !fee_out.is_op_true() {
            return Err(SettlementError::CanonicalOrder(
                "TRANSFER_M1 final output must be the OP_TRUE fee output".into(),
            ));
        }
        if recipients.iter().any(|o| o.is_op_true()) {
            return Err(SettlementError::CanonicalOrder(
                "TRANSFER_M1 recipient outputs must not be OP_TRUE".into(),
            ));
        }
        let recipient_total: u64 = recipients.iter().map(|o| o.value).sum();
        let min_fee = compute_min_fee(encoded_size(tx), self.min_fee_rate);
        if fee_out.value < min_fee {
            return Err(SettlementError::FeeTooLow {
                got: fee_out.value,
                required: min_fee,
            });
        }
        if receipt.amount != recipient_total + fee_out.value {
            return Err(SettlementError::Conservation(format!(
                "TRANSFER_M1 conservation failed: {} != {} + {}",
                receipt.amount, recipient_total, fee_out.value
            )));
        }

        let txid = tx.txid();
        overlay.remove_receipt(receipt.outpoint);
        for (i, out) in recipients.iter().enumerate() {
            overlay.put_receipt(Receipt {
                outpoint: OutPoint::new(txid, i as u32),
                amount: out.value,
                create_height: height,
            });
        }
        let fee_idx = recipients.len() as u32;
        let fee_receipt_outpoint = OutPoint::new(txid, fee_idx);
        overlay.put_receipt(Receipt {
            outpoint: fee_receipt_outpoint,
            amount: fee_out.value,
            create_height: height,
        });

        overlay.push_transfer_undo(
            txid,
            TransferUndo {
                original_receipt: receipt,
                recipient_count: recipients.len(),
                fee_receipt: fee_receipt_outpoint,
            },
        );
        Ok(())
    }
}
