//! HTLC creation, claim, and refund (single-hashlock and three-secret
//! variants), §4.7. Split from `mod.rs` only for size; these functions are
//! `impl SettlementEngine` methods in spirit, taking `&SettlementEngine`
//! explicitly so they can live in their own file.

use super::overlay::{HtlcOverlay, SettlementOverlay};
use super::payloads::{
    HtlcClaim3sPayload, HtlcClaimPayload, HtlcCreate3sPayload, HtlcCreatePayload,
};
use super::{SettlementEngine, SettlementError};
use crate::types::{
    Hash256, Htlc3sRecord, Htlc3sResolveUndo, HtlcCreateUndo, HtlcRecord, HtlcResolveUndo,
    HtlcStatus, OutPoint, Receipt, Transaction,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HtlcError {
    #[error("structural: {0}")]
    Structural(String),
    #[error("conservation: {0}")]
    Conservation(String),
    #[error("signature: {0}")]
    Signature(String),
    #[error("timing: {0}")]
    Timing(String),
}

impl HtlcError {
    pub fn reject_kind(&self) -> crate::error::RejectKind {
        use crate::error::RejectKind;
        match self {
            HtlcError::Structural(_) => RejectKind::Structural,
            HtlcError::Conservation(_) => RejectKind::Conservation,
            HtlcError::Signature(_) => RejectKind::Signature,
            HtlcError::Timing(_) => RejectKind::Timing,
        }
    }
}

fn legacy_htlc_create_payload() -> HtlcCreatePayload {
    HtlcCreatePayload {
        hashlock: [0u8; 32],
        expiry_height: u64::MAX,
        claim_key_hash: [0u8; 32],
        refund_key_hash: [0u8; 32],
        redeem_script: Vec::new(),
        covenant: None,
    }
}

/// One M1 receipt input; `vout[0]` is a P2SH output equal to the input
/// amount. Legacy blocks may carry an empty/undecodable payload at or below
/// `legacy_htlc_cutoff_height`, tolerated with default (null) HTLC terms.
pub(crate) fn apply_htlc_create(
    engine: &SettlementEngine,
    tx: &Transaction,
    height: u64,
    overlay: &mut SettlementOverlay,
    htlc_overlay: &mut HtlcOverlay,
) -> Result<(), SettlementError> {
    if tx.inputs.len() != 1 {
        return Err(HtlcError::Structural("HTLC_CREATE requires exactly one input".into()).into());
    }
    let op = tx.inputs[0].previous_output;
    let receipt = overlay
        .get_receipt(&engine.settlement, &op)?
        .ok_or(SettlementError::UnknownInput(op))?;
    let vout0 = tx
        .outputs
        .first()
        .ok_or_else(|| HtlcError::Structural("HTLC_CREATE requires an output".into()))?;
    if vout0.value != receipt.amount {
        return Err(HtlcError::Conservation(
            "HTLC amount must equal the consumed receipt amount".into(),
        )
        .into());
    }

    let payload_bytes = tx.special_payload().unwrap_or(&[]);
    let is_legacy_height = matches!(engine.legacy_htlc_cutoff_height(), Some(cutoff) if height <= cutoff);
    let payload: HtlcCreatePayload = if payload_bytes.is_empty() {
        if is_legacy_height {
            legacy_htlc_create_payload()
        } else {
            return Err(HtlcError::Structural("HTLC_CREATE payload missing".into()).into());
        }
    } else {
        match bincode::deserialize(payload_bytes) {
            Ok(p) => p,
            Err(e) if is_legacy_height => {
                let _ = e;
                legacy_htlc_create_payload()
            }
            Err(e) => {
                return Err(HtlcError::Structural(format!("undecodable HTLC_CREATE payload: {e}")).into())
            }
        }
    };

    let txid = tx.txid();
    let htlc_outpoint = OutPoint::new(txid, 0);
    overlay.remove_receipt(receipt.outpoint);
    htlc_overlay.put(HtlcRecord {
        htlc_outpoint,
        hashlock: payload.hashlock,
        source_receipt: receipt.outpoint,
        amount: vout0.value,
        claim_key_hash: payload.claim_key_hash,
        refund_key_hash: payload.refund_key_hash,
        create_height: height,
        expiry_height: payload.expiry_height,
        redeem_script: payload.redeem_script,
        status: HtlcStatus::Active,
        resolve_txid: None,
        preimage: None,
        covenant: payload
            .covenant
            .as_ref()
            .map(|c| bincode::serialize(c).expect("covenant payload serializes")),
    });
    htlc_overlay.push_create_undo(txid, HtlcCreateUndo { consumed_receipt: receipt });
    Ok(())
}

/// `vin[0]` is an active HTLC; preimage (carried in the special payload,
/// standing in for the base-layer unlocking script — out of scope per §1)
/// must hash to the record's hashlock. Pivots into a follow-up HTLC if the
/// original creation declared a covenant, otherwise mints a plain receipt.
pub(crate) fn apply_htlc_claim(
    engine: &SettlementEngine,
    tx: &Transaction,
    height: u64,
    overlay: &mut SettlementOverlay,
    htlc_overlay: &mut HtlcOverlay,
) -> Result<(), SettlementError> {
    if tx.inputs.len() != 1 {
        return Err(HtlcError::Structural("HTLC_CLAIM requires exactly one input".into()).into());
    }
    let op = tx.inputs[0].previous_output;
    let record = htlc_overlay
        .get(&engine.htlc, &op)?
        .ok_or(SettlementError::UnknownInput(op))?;
    if record.status != HtlcStatus::Active {
        return Err(HtlcError::Timing("HTLC is not active".into()).into());
    }
    let payload: HtlcClaimPayload = tx
        .special_payload()
        .ok_or_else(|| HtlcError::Structural("HTLC_CLAIM payload missing".into()))
        .and_then(|b| bincode::deserialize(b).map_err(|e| HtlcError::Structural(e.to_string())))?;
    let hash: Hash256 = Sha256::digest(payload.preimage).into();
    if hash != record.hashlock {
        return Err(HtlcError::Signature("preimage does not match hashlock".into()).into());
    }
    let vout0 = tx
        .outputs
        .first()
        .ok_or_else(|| HtlcError::Structural("HTLC_CLAIM requires an output".into()))?;

    let txid = tx.txid();
    let hashlock = record.hashlock;
    let covenant = record.covenant.clone();
    let htlc_amount = record.amount;

    let mut new_record = record.clone();
    new_record.status = HtlcStatus::Claimed;
    new_record.resolve_txid = Some(txid);
    new_record.preimage = Some(payload.preimage);

    if let Some(covenant_bytes) = covenant {
        let covenant_payload: HtlcCreatePayload = bincode::deserialize(&covenant_bytes)
            .map_err(|e| HtlcError::Structural(format!("corrupt covenant payload: {e}")))?;
        if vout0.value > htlc_amount {
            return Err(HtlcError::Conservation("covenant output exceeds HTLC amount".into()).into());
        }
        let follow_up_outpoint = OutPoint::new(txid, 0);
        htlc_overlay.put(HtlcRecord {
            htlc_outpoint: follow_up_outpoint,
            hashlock: covenant_payload.hashlock,
            source_receipt: record.htlc_outpoint,
            amount: vout0.value,
            claim_key_hash: covenant_payload.claim_key_hash,
            refund_key_hash: covenant_payload.refund_key_hash,
            create_height: height,
            expiry_height: covenant_payload.expiry_height,
            redeem_script: covenant_payload.redeem_script,
            status: HtlcStatus::Active,
            resolve_txid: None,
            preimage: None,
            covenant: covenant_payload
                .covenant
                .as_ref()
                .map(|c| bincode::serialize(c).expect("covenant payload serializes")),
        });
    } else {
        if vout0.value != htlc_amount {
            return Err(HtlcError::Conservation("claim output must equal the HTLC amount".into()).into());
        }
        overlay.put_receipt(Receipt {
            outpoint: OutPoint::new(txid, 0),
            amount: vout0.value,
            create_height: height,
        });
    }

    htlc_overlay.erase_hashlock_index(0, hashlock);
    htlc_overlay.update(new_record);
    htlc_overlay.push_resolve_undo(txid, HtlcResolveUndo { pre_resolve: record });
    Ok(())
}

/// `vin[0]` is an active HTLC; current height ≥ `expiry_height`. Mints a
/// plain M1 receipt back to the creator.
pub(crate) fn apply_htlc_refund(
    engine: &SettlementEngine,
    tx: &Transaction,
    height: u64,
    overlay: &mut SettlementOverlay,
    htlc_overlay: &mut HtlcOverlay,
) -> Result<(), SettlementError> {
    if tx.inputs.len() != 1 {
        return Err(HtlcError::Structural("HTLC_REFUND requires exactly one input".into()).into());
    }
    let op = tx.inputs[0].previous_output;
    let record = htlc_overlay
        .get(&engine.htlc, &op)?
        .ok_or(SettlementError::UnknownInput(op))?;
    if record.status != HtlcStatus::Active {
        return Err(HtlcError::Timing("HTLC is not active".into()).into());
    }
    if height < record.expiry_height {
        return Err(HtlcError::Timing("HTLC refund attempted before expiry".into()).into());
    }
    let vout0 = tx
        .outputs
        .first()
        .ok_or_else(|| HtlcError::Structural("HTLC_REFUND requires an output".into()))?;
    if vout0.value != record.amount {
        return Err(HtlcError::Conservation("refund output must equal the HTLC amount".into()).into());
    }

    let txid = tx.txid();
    let hashlock = record.hashlock;
    let mut new_record = record.clone();
    new_record.status = HtlcStatus::Refunded;
    new_record.resolve_txid = Some(txid);

    htlc_overlay.erase_hashlock_index(0, hashlock);
    htlc_overlay.update(new_record);
    overlay.put_receipt(Receipt {
        outpoint: OutPoint::new(txid, 0),
        amount: vout0.value,
        create_height: height,
    });
    htlc_overlay.push_resolve_undo(txid, HtlcResolveUndo { pre_resolve: record });
    Ok(())
}

/// Three-secret variant of [`apply_htlc_create`]: three independent
/// hashlocks, each indexed in its own slot. No covenant continuation — the
/// covenant mechanism is only defined for the single-hashlock HTLC (§4.7).
pub(crate) fn apply_htlc_create_3s(
    engine: &SettlementEngine,
    tx: &Transaction,
    height: u64,
    overlay: &mut SettlementOverlay,
    htlc_overlay: &mut HtlcOverlay,
) -> Result<(), SettlementError> {
    if tx.inputs.len() != 1 {
        return Err(HtlcError::Structural("HTLC_CREATE_3S requires exactly one input".into()).into());
    }
    let op = tx.inputs[0].previous_output;
    let receipt = overlay
        .get_receipt(&engine.settlement, &op)?
        .ok_or(SettlementError::UnknownInput(op))?;
    let vout0 = tx
        .outputs
        .first()
        .ok_or_else(|| HtlcError::Structural("HTLC_CREATE_3S requires an output".into()))?;
    if vout0.value != receipt.amount {
        return Err(HtlcError::Conservation(
            "HTLC amount must equal the consumed receipt amount".into(),
        )
        .into());
    }
    let payload_bytes = tx
        .special_payload()
        .ok_or_else(|| HtlcError::Structural("HTLC_CREATE_3S payload missing".into()))?;
    let payload: HtlcCreate3sPayload =
        bincode::deserialize(payload_bytes).map_err(|e| HtlcError::Structural(e.to_string()))?;

    let txid = tx.txid();
    let htlc_outpoint = OutPoint::new(txid, 0);
    overlay.remove_receipt(receipt.outpoint);
    htlc_overlay.put_3s(Htlc3sRecord {
        htlc_outpoint,
        hashlocks: payload.hashlocks,
        source_receipt: receipt.outpoint,
        amount: vout0.value,
        claim_key_hash: payload.claim_key_hash,
        refund_key_hash: payload.refund_key_hash,
        create_height: height,
        expiry_height: payload.expiry_height,
        redeem_script: payload.redeem_script,
        status: HtlcStatus::Active,
        resolve_txid: None,
        preimages: None,
    });
    htlc_overlay.push_create_undo(txid, HtlcCreateUndo { consumed_receipt: receipt });
    Ok(())
}

/// Three-secret claim: all three preimages must verify against their own
/// hashlock slot before the claim succeeds.
pub(crate) fn apply_htlc_claim_3s(
    engine: &SettlementEngine,
    tx: &Transaction,
    height: u64,
    overlay: &mut SettlementOverlay,
    htlc_overlay: &mut HtlcOverlay,
) -> Result<(), SettlementError> {
    if tx.inputs.len() != 1 {
        return Err(HtlcError::Structural("HTLC_CLAIM_3S requires exactly one input".into()).into());
    }
    let op = tx.inputs[0].previous_output;
    let record = htlc_overlay
        .get_3s(&engine.htlc, &op)?
        .ok_or(SettlementError::UnknownInput(op))?;
    if record.status != HtlcStatus::Active {
        return Err(HtlcError::Timing("HTLC is not active".into()).into());
    }
    let payload: HtlcClaim3sPayload = tx
        .special_payload()
        .ok_or_else(|| HtlcError::Structural("HTLC_CLAIM_3S payload missing".into()))
        .and_then(|b| bincode::deserialize(b).map_err(|e| HtlcError::Structural(e.to_string())))?;
    for (i, preimage) in payload.preimages.iter().enumerate() {
        let hash: Hash256 = Sha256::digest(preimage).into();
        if hash != record.hashlocks[i] {
            return Err(HtlcError::Signature(format!("preimage {i} does not match its hashlock")).into());
        }
    }
    let vout0 = tx
        .outputs
        .first()
        .ok_or_else(|| HtlcError::Structural("HTLC_CLAIM_3S requires an output".into()))?;
    if vout0.value != record.amount {
        return Err(HtlcError::Conservation("claim output must equal the HTLC amount".into()).into());
    }

    let txid = tx.txid();
    let hashlocks = record.hashlocks;
    let mut new_record = record.clone();
    new_record.status = HtlcStatus::Claimed;
    new_record.resolve_txid = Some(txid);
    new_record.preimages = Some(payload.preimages);

    for (slot, hashlock) in hashlocks.iter().enumerate() {
        htlc_overlay.erase_hashlock_index(slot as u8, *hashlock);
    }
    htlc_overlay.update_3s(new_record);
    overlay.put_receipt(Receipt {
        outpoint: OutPoint::new(txid, 0),
        amount: vout0.value,
        create_height: height,
    });
    htlc_overlay.push_resolve_undo_3s(txid, Htlc3sResolveUndo { pre_resolve: record });
    Ok(())
}

/// Three-secret refund: mirrors [`apply_htlc_refund`].
pub(crate) fn apply_htlc_refund_3s(
    engine: &SettlementEngine,
    tx: &Transaction,
    height: u64,
    overlay: &mut SettlementOverlay,
    htlc_overlay: &mut HtlcOverlay,
) -> Result<(), SettlementError> {
    if tx.inputs.len() != 1 {
        return Err(HtlcError::Structural("HTLC_REFUND_3S requires exactly one input".into()).into());
    }
    let op = tx.inputs[0].previous_output;
    let record = htlc_overlay
        .get_3s(&engine.htlc, &op)?
        .ok_or(SettlementError::UnknownInput(op))?;
    if record.status != HtlcStatus::Active {
        return Err(HtlcError::Timing("HTLC is not active".into()).into());
    }
    if height < record.expiry_height {
        return Err(HtlcError::Timing("HTLC refund attempted before expiry".into()).into());
    }
    let vout0 = tx
        .outputs
        .first()
        .ok_or_else(|| HtlcError::Structural("HTLC_REFUND_3S requires an output".into()))?;
    if vout0.value != record.amount {
        return Err(HtlcError::Conservation("refund output must equal the HTLC amount".into()).into());
    }

    let txid = tx.txid();
    let hashlocks = record.hashlocks;
    let mut new_record = record.clone();
    new_record.status = HtlcStatus::Refunded;
    new_record.resolve_txid = Some(txid);

    for (slot, hashlock) in hashlocks.iter().enumerate() {
        htlc_overlay.erase_hashlock_index(slot as u8, *hashlock);
    }
    htlc_overlay.update_3s(new_record);
    overlay.put_receipt(Receipt {
        outpoint: OutPoint::new(txid, 0),
        amount: vout0.value,
        create_height: height,
    });
    htlc_overlay.push_resolve_undo_3s(txid, Htlc3sResolveUndo { pre_resolve: record });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HtlcStore, SettlementStore};
    use crate::types::{Receipt, SpecialTxType, TxInput, TxOutput};
    use std::sync::Arc;

    fn fresh_engine() -> (tempfile::TempDir, SettlementEngine) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let settlement = Arc::new(SettlementStore::open(&db).unwrap());
        let htlc = Arc::new(HtlcStore::open(&db).unwrap());
        (dir, SettlementEngine::new(settlement, htlc, 1_000, None))
    }

    fn seed_receipt(overlay: &mut SettlementOverlay, outpoint: OutPoint, amount: u64) {
        overlay.put_receipt(Receipt {
            outpoint,
            amount,
            create_height: 1,
        });
    }

    #[test]
    fn claim_with_correct_preimage_mints_receipt() {
        let (_dir, engine) = fresh_engine();
        let mut overlay = SettlementOverlay::new();
        let mut htlc_overlay = HtlcOverlay::new();

        let source = OutPoint::new([1u8; 32], 0);
        seed_receipt(&mut overlay, source, 5_000);

        let preimage = [7u8; 32];
        let hashlock: Hash256 = Sha256::digest(preimage).into();
        let create_payload = HtlcCreatePayload {
            hashlock,
            expiry_height: 1_000,
            claim_key_hash: [0u8; 32],
            refund_key_hash: [0u8; 32],
            redeem_script: vec![],
            covenant: None,
        };
        let create_tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: source,
                script_sig: vec![],
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                value: 5_000,
                script_pubkey: vec![0xA9],
            }],
            lock_time: 0,
            timestamp: 0,
            special: Some((SpecialTxType::HtlcCreate as u8, bincode::serialize(&create_payload).unwrap())),
        };
        apply_htlc_create(&engine, &create_tx, 10, &mut overlay, &mut htlc_overlay).unwrap();
        let htlc_outpoint = OutPoint::new(create_tx.txid(), 0);
        assert!(htlc_overlay.get(&engine.htlc, &htlc_outpoint).unwrap().is_some());

        let claim_payload = HtlcClaimPayload { preimage };
        let claim_tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: htlc_outpoint,
                script_sig: vec![],
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                value: 5_000,
                script_pubkey: vec![0xBB],
            }],
            lock_time: 0,
            timestamp: 0,
            special: Some((SpecialTxType::HtlcClaim as u8, bincode::serialize(&claim_payload).unwrap())),
        };
        apply_htlc_claim(&engine, &claim_tx, 11, &mut overlay, &mut htlc_overlay).unwrap();
        let resolved = htlc_overlay.get(&engine.htlc, &htlc_outpoint).unwrap().unwrap();
        assert_eq!(resolved.status, HtlcStatus::Claimed);
    }

    #[test]
    fn claim_with_wrong_preimage_rejected() {
        let (_dir, engine) = fresh_engine();
        let mut overlay = SettlementOverlay::new();
        let mut htlc_overlay = HtlcOverlay::new();

        let source = OutPoint::new([2u8; 32], 0);
        seed_receipt(&mut overlay, source, 1_000);
        let preimage = [9u8; 32];
        let hashlock: Hash256 = Sha256::digest(preimage).into();
        let create_payload = HtlcCreatePayload {
            hashlock,
            expiry_height: 500,
            claim_key_hash: [0u8; 32],
            refund_key_hash: [0u8; 32],
            redeem_script: vec![],
            covenant: None,
        };
        let create_tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: source,
                script_sig: vec![],
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                value: 1_000,
                script_pubkey: vec![0xA9],
            }],
            lock_time: 0,
            timestamp: 0,
            special: Some((SpecialTxType::HtlcCreate as u8, bincode::serialize(&create_payload).unwrap())),
        };
        apply_htlc_create(&engine, &create_tx, 5, &mut overlay, &mut htlc_overlay).unwrap();
        let htlc_outpoint = OutPoint::new(create_tx.txid(), 0);

        let wrong_claim = HtlcClaimPayload { preimage: [0u8; 32] };
        let claim_tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: htlc_outpoint,
                script_sig: vec![],
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                value: 1_000,
                script_pubkey: vec![0xBB],
            }],
            lock_time: 0,
            timestamp: 0,
            special: Some((SpecialTxType::HtlcClaim as u8, bincode::serialize(&wrong_claim).unwrap())),
        };
        let err = apply_htlc_claim(&engine, &claim_tx, 6, &mut overlay, &mut htlc_overlay).unwrap_err();
        assert!(matches!(err, SettlementError::Htlc(HtlcError::Signature(_))));
    }

    #[test]
    fn refund_before_expiry_rejected() {
        let (_dir, engine) = fresh_engine();
        let mut overlay = SettlementOverlay::new();
        let mut htlc_overlay = HtlcOverlay::new();

        let source = OutPoint::new([3u8; 32], 0);
        seed_receipt(&mut overlay, source, 2_000);
        let create_payload = HtlcCreatePayload {
            hashlock: [1u8; 32],
            expiry_height: 100,
            claim_key_hash: [0u8; 32],
            refund_key_hash: [0u8; 32],
            redeem_script: vec![],
            covenant: None,
        };
        let create_tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: source,
                script_sig: vec![],
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                value: 2_000,
                script_pubkey: vec![0xA9],
            }],
            lock_time: 0,
            timestamp: 0,
            special: Some((SpecialTxType::HtlcCreate as u8, bincode::serialize(&create_payload).unwrap())),
        };
        apply_htlc_create(&engine, &create_tx, 10, &mut overlay, &mut htlc_overlay).unwrap();
        let htlc_outpoint = OutPoint::new(create_tx.txid(), 0);

        let refund_tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: htlc_outpoint,
                script_sig: vec![],
                sequence: 0,
            }],
            outputs: vec![TxOutput {
                value: 2_000,
                script_pubkey: vec![0xCC],
            }],
            lock_time: 0,
            timestamp: 0,
            special: Some((SpecialTxType::HtlcRefund as u8, Vec::new())),
        };
        let err = apply_htlc_refund(&engine, &refund_tx, 50, &mut overlay, &mut htlc_overlay).unwrap_err();
        assert!(matches!(err, SettlementError::Htlc(HtlcError::Timing(_))));
    }
}
