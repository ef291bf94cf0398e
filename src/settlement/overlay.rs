//! In-memory staging overlays for the settlement and HTLC stores (§4.8).
//!
//! The atomic committer processes an entire block's special transactions
//! against these overlays before a single byte reaches `sled`. A read first
//! checks the overlay (so a later transaction in the same block can see an
//! earlier one's writes — e.g. TRANSFER_M1 spending a receipt LOCK just
//! created), falling back to the persisted store. Nothing is written to
//! disk until `commit()` is called, which the committer only does after the
//! A5/A6 invariants have been checked against the fully-staged state.

use crate::error::StorageError;
use crate::storage::{HtlcStore, SettlementStore};
use crate::types::{
    Hash256, Htlc3sRecord, Htlc3sResolveUndo, HtlcCreateUndo, HtlcRecord, HtlcResolveUndo,
    OutPoint, Receipt, TransferUndo, UnlockUndo, Vault,
};
use std::collections::HashMap;

#[derive(Default)]
pub struct SettlementOverlay {
    vaults: HashMap<OutPoint, Option<Vault>>,
    receipts: HashMap<OutPoint, Option<Receipt>>,
    unlock_undos: Vec<(Hash256, UnlockUndo)>,
    transfer_undos: Vec<(Hash256, TransferUndo)>,
}

impl SettlementOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_vault(&self, store: &SettlementStore, outpoint: &OutPoint) -> Result<Option<Vault>, StorageError> {
        match self.vaults.get(outpoint) {
            Some(v) => Ok(v.clone()),
            None => store.get_vault(outpoint),
        }
    }

    pub fn put_vault(&mut self, vault: Vault) {
        self.vaults.insert(vault.outpoint, Some(vault));
    }

    pub fn remove_vault(&mut self, outpoint: OutPoint) {
        self.vaults.insert(outpoint, None);
    }

    pub fn get_receipt(&self, store: &SettlementStore, outpoint: &OutPoint) -> Result<Option<Receipt>, StorageError> {
        match self.receipts.get(outpoint) {
            Some(r) => Ok(r.clone()),
            None => store.get_receipt(outpoint),
        }
    }

    pub fn put_receipt(&mut self, receipt: Receipt) {
        self.receipts.insert(receipt.outpoint, Some(receipt));
    }

    pub fn remove_receipt(&mut self, outpoint: OutPoint) {
        self.receipts.insert(outpoint, None);
    }

    pub fn push_unlock_undo(&mut self, txid: Hash256, undo: UnlockUndo) {
        self.unlock_undos.push((txid, undo));
    }

    pub fn push_transfer_undo(&mut self, txid: Hash256, undo: TransferUndo) {
        self.transfer_undos.push((txid, undo));
    }

    /// Flush every staged write to the persisted store. Only called by the
    /// committer once invariants have been validated against this overlay.
    pub fn commit(self, store: &SettlementStore) -> Result<(), StorageError> {
        for (outpoint, vault) in self.vaults {
            match vault {
                Some(v) => store.put_vault(&v)?,
                None => store.remove_vault(&outpoint)?,
            }
        }
        for (outpoint, receipt) in self.receipts {
            match receipt {
                Some(r) => store.put_receipt(&r)?,
                None => store.remove_receipt(&outpoint)?,
            }
        }
        for (txid, undo) in &self.unlock_undos {
            store.put_unlock_undo(txid, undo)?;
        }
        for (txid, undo) in &self.transfer_undos {
            store.put_transfer_undo(txid, undo)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct HtlcOverlay {
    records: HashMap<OutPoint, Option<HtlcRecord>>,
    records_3s: HashMap<OutPoint, Option<Htlc3sRecord>>,
    hashlock_index: HashMap<(u8, Hash256), Option<OutPoint>>,
    create_undos: Vec<(Hash256, HtlcCreateUndo)>,
    resolve_undos: Vec<(Hash256, HtlcResolveUndo)>,
    resolve_undos_3s: Vec<(Hash256, Htlc3sResolveUndo)>,
}

impl HtlcOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, store: &HtlcStore, outpoint: &OutPoint) -> Result<Option<HtlcRecord>, StorageError> {
        match self.records.get(outpoint) {
            Some(r) => Ok(r.clone()),
            None => store.get(outpoint),
        }
    }

    pub fn put(&mut self, record: HtlcRecord) {
        let slot_key = (0u8, record.hashlock);
        self.hashlock_index.insert(slot_key, Some(record.htlc_outpoint));
        self.records.insert(record.htlc_outpoint, Some(record));
    }

    pub fn update(&mut self, record: HtlcRecord) {
        self.records.insert(record.htlc_outpoint, Some(record));
    }

    pub fn get_3s(&self, store: &HtlcStore, outpoint: &OutPoint) -> Result<Option<Htlc3sRecord>, StorageError> {
        match self.records_3s.get(outpoint) {
            Some(r) => Ok(r.clone()),
            None => store.get_3s(outpoint),
        }
    }

    pub fn put_3s(&mut self, record: Htlc3sRecord) {
        for (slot, hashlock) in record.hashlocks.iter().enumerate() {
            self.hashlock_index
                .insert((slot as u8, *hashlock), Some(record.htlc_outpoint));
        }
        self.records_3s.insert(record.htlc_outpoint, Some(record));
    }

    pub fn update_3s(&mut self, record: Htlc3sRecord) {
        self.records_3s.insert(record.htlc_outpoint, Some(record));
    }

    pub fn lookup_by_hashlock(
        &self,
        store: &HtlcStore,
        slot: u8,
        hashlock: &Hash256,
    ) -> Result<Option<OutPoint>, StorageError> {
        match self.hashlock_index.get(&(slot, *hashlock)) {
            Some(op) => Ok(*op),
            None => store.lookup_by_hashlock_slot(slot, hashlock),
        }
    }

    pub fn erase_hashlock_index(&mut self, slot: u8, hashlock: Hash256) {
        self.hashlock_index.insert((slot, hashlock), None);
    }

    pub fn push_create_undo(&mut self, txid: Hash256, undo: HtlcCreateUndo) {
        self.create_undos.push((txid, undo));
    }

    pub fn push_resolve_undo(&mut self, txid: Hash256, undo: HtlcResolveUndo) {
        self.resolve_undos.push((txid, undo));
    }

    pub fn push_resolve_undo_3s(&mut self, txid: Hash256, undo: Htlc3sResolveUndo) {
        self.resolve_undos_3s.push((txid, undo));
    }

    pub fn commit(self, store: &HtlcStore) -> Result<(), StorageError> {
        for (outpoint, record) in self.records {
            match record {
                Some(r) => store.put(&r)?,
                None => {
                    let _ = outpoint;
                }
            }
        }
        for (outpoint, record) in self.records_3s {
            match record {
                Some(r) => store.put_3s(&r)?,
                None => {
                    let _ = outpoint;
                }
            }
        }
        for ((slot, hashlock), value) in self.hashlock_index {
            match value {
                Some(_) => {} // already written by put()/put_3s() above
                None => store.erase_hashlock_index_slot(slot, &hashlock)?,
            }
        }
        for (txid, undo) in &self.create_undos {
            store.put_create_undo(txid, undo)?;
        }
        for (txid, undo) in &self.resolve_undos {
            store.put_resolve_undo(txid, undo)?;
        }
        for (txid, undo) in &self.resolve_undos_3s {
            store.put_resolve_undo_3s(txid, undo)?;
        }
        Ok(())
    }
}
