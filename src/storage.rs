//! On-disk layout for the five logical key-value stores named in §6.
//!
//! All five live as separate `sled::Tree`s inside one `sled::Db`, which
//! keeps a single file handle / lock for the whole node while still giving
//! each store its own namespace. The Settlement store further partitions
//! its tree with the one-byte key prefixes from §6 (`V/R/G/U/T/B/A/H/Z`)
//! rather than using sub-trees, because those records need to be iterated
//! as a contiguous range per prefix (e.g. "all vaults").

use crate::error::StorageError;
use crate::types::{
    Hash256, Htlc3sRecord, Htlc3sResolveUndo, HtlcCreateUndo, HtlcRecord, HtlcResolveUndo,
    OutPoint, Receipt, SettlementSnapshot, TransferUndo, UnlockUndo, Vault,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

const PREFIX_VAULT: u8 = b'V';
const PREFIX_RECEIPT: u8 = b'R';
const PREFIX_SNAPSHOT: u8 = b'G';
const PREFIX_UNLOCK_UNDO: u8 = b'U';
const PREFIX_TRANSFER_UNDO: u8 = b'T';
const PREFIX_BEST_BLOCK: u8 = b'B';
const PREFIX_ALL_COMMITTED: u8 = b'A';
const PREFIX_BURN_SCAN_HEADER: u8 = b'H';
const PREFIX_BURN_SCAN_TAIL: u8 = b'Z';

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

fn prefixed_key(prefix: u8, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + suffix.len());
    key.push(prefix);
    key.extend_from_slice(suffix);
    key
}

/// Every store that participates in the §4.8 atomic commit cycle carries a
/// per-DB best-block marker; the committer compares these against the
/// single all-committed marker on crash recovery.
pub trait CommitParticipant {
    fn best_block_height(&self) -> Result<Option<u64>, StorageError>;
    fn set_best_block_height(&self, height: u64) -> Result<(), StorageError>;
}

/// Settlement store: vaults, receipts, per-height snapshots, undo records,
/// plus its own best-block / all-committed markers and burn-scan progress.
pub struct SettlementStore {
    tree: sled::Tree,
}

impl SettlementStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("settlement").map_err(|e| StorageError::DatabaseOpen {
            name: "settlement".into(),
            source: e,
        })?;
        Ok(Self { tree })
    }

    pub fn put_vault(&self, vault: &Vault) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_VAULT, &encode(&vault.outpoint)?);
        self.tree.insert(key, encode(vault)?)?;
        Ok(())
    }

    pub fn get_vault(&self, outpoint: &OutPoint) -> Result<Option<Vault>, StorageError> {
        let key = prefixed_key(PREFIX_VAULT, &encode(outpoint)?);
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_vault(&self, outpoint: &OutPoint) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_VAULT, &encode(outpoint)?);
        self.tree.remove(key)?;
        Ok(())
    }

    pub fn put_receipt(&self, receipt: &Receipt) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_RECEIPT, &encode(&receipt.outpoint)?);
        self.tree.insert(key, encode(receipt)?)?;
        Ok(())
    }

    pub fn get_receipt(&self, outpoint: &OutPoint) -> Result<Option<Receipt>, StorageError> {
        let key = prefixed_key(PREFIX_RECEIPT, &encode(outpoint)?);
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_receipt(&self, outpoint: &OutPoint) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_RECEIPT, &encode(outpoint)?);
        self.tree.remove(key)?;
        Ok(())
    }

    pub fn put_snapshot(&self, snapshot: &SettlementSnapshot) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_SNAPSHOT, &snapshot.height.to_be_bytes());
        self.tree.insert(key, encode(snapshot)?)?;
        Ok(())
    }

    pub fn get_snapshot(&self, height: u64) -> Result<Option<SettlementSnapshot>, StorageError> {
        let key = prefixed_key(PREFIX_SNAPSHOT, &height.to_be_bytes());
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_unlock_undo(&self, txid: &Hash256, undo: &UnlockUndo) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_UNLOCK_UNDO, txid);
        self.tree.insert(key, encode(undo)?)?;
        Ok(())
    }

    pub fn take_unlock_undo(&self, txid: &Hash256) -> Result<Option<UnlockUndo>, StorageError> {
        let key = prefixed_key(PREFIX_UNLOCK_UNDO, txid);
        match self.tree.remove(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_transfer_undo(
        &self,
        txid: &Hash256,
        undo: &TransferUndo,
    ) -> Result<(), StorageError> {
        let key = prefixed_key(PREFIX_TRANSFER_UNDO, txid);
        self.tree.insert(key, encode(undo)?)?;
        Ok(())
    }

    pub fn take_transfer_undo(&self, txid: &Hash256) -> Result<Option<TransferUndo>, StorageError> {
        let key = prefixed_key(PREFIX_TRANSFER_UNDO, txid);
        match self.tree.remove(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Burn-scan progress markers (`H` head / `Z` tail); opaque payload —
    /// owned by the burn-detection collaborator, not interpreted here.
    pub fn set_burn_scan_progress(&self, head: u64, tail: u64) -> Result<(), StorageError> {
        self.tree
            .insert([PREFIX_BURN_SCAN_HEADER], &head.to_be_bytes())?;
        self.tree
            .insert([PREFIX_BURN_SCAN_TAIL], &tail.to_be_bytes())?;
        Ok(())
    }

    /// Wipe every record in the store, keeping the tree itself open. Used by
    /// rebuild-from-chain (§4.8) before replaying the genesis snapshot.
    pub fn wipe(&self) -> Result<(), StorageError> {
        self.tree.clear()?;
        Ok(())
    }
}

impl CommitParticipant for SettlementStore {
    fn best_block_height(&self) -> Result<Option<u64>, StorageError> {
        match self.tree.get([PREFIX_BEST_BLOCK])? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    StorageError::DatabaseOp("corrupt best-block marker".into())
                })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn set_best_block_height(&self, height: u64) -> Result<(), StorageError> {
        self.tree.insert([PREFIX_BEST_BLOCK], &height.to_be_bytes())?;
        Ok(())
    }
}

/// The single all-committed marker lives alongside the settlement store's
/// own keyspace (prefix `A`) since it is the canonical tip of the commit.
impl SettlementStore {
    pub fn all_committed_height(&self) -> Result<Option<u64>, StorageError> {
        match self.tree.get([PREFIX_ALL_COMMITTED])? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::DatabaseOp("corrupt all-committed marker".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    pub fn set_all_committed_height(&self, height: u64) -> Result<(), StorageError> {
        self.tree
            .insert([PREFIX_ALL_COMMITTED], &height.to_be_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

/// HTLC store: records by outpoint, hashlock secondary indices (three for
/// the 3-secret variant), and create/resolve undo by txid.
pub struct HtlcStore {
    tree: sled::Tree,
    best_block: sled::Tree,
}

impl HtlcStore {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("htlc").map_err(|e| StorageError::DatabaseOpen {
            name: "htlc".into(),
            source: e,
        })?;
        let best_block =
            db.open_tree("htlc_meta").map_err(|e| StorageError::DatabaseOpen {
                name: "htlc_meta".into(),
                source: e,
            })?;
        Ok(Self { tree, best_block })
    }

    fn record_key(outpoint: &OutPoint) -> Result<Vec<u8>, StorageError> {
        Ok(prefixed_key(b'h', &encode(outpoint)?))
    }

    fn record_key_3s(outpoint: &OutPoint) -> Result<Vec<u8>, StorageError> {
        Ok(prefixed_key(b'H', &encode(outpoint)?))
    }

    fn hashlock_key(slot: u8, hashlock: &Hash256) -> Vec<u8> {
        prefixed_key(b'l', &[&[slot], hashlock.as_slice()].concat())
    }

    pub fn put(&self, record: &HtlcRecord) -> Result<(), StorageError> {
        let key = Self::record_key(&record.htlc_outpoint)?;
        self.tree.insert(key, encode(record)?)?;
        let hk = Self::hashlock_key(0, &record.hashlock);
        self.tree.insert(hk, encode(&record.htlc_outpoint)?)?;
        Ok(())
    }

    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<HtlcRecord>, StorageError> {
        let key = Self::record_key(outpoint)?;
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update(&self, record: &HtlcRecord) -> Result<(), StorageError> {
        let key = Self::record_key(&record.htlc_outpoint)?;
        self.tree.insert(key, encode(record)?)?;
        Ok(())
    }

    /// Remove a single-hashlock record outright, used by reorg undo when the
    /// outpoint it occupies never existed before this block (e.g. a covenant
    /// follow-up minted by a claim being rolled back).
    pub fn remove(&self, outpoint: &OutPoint) -> Result<(), StorageError> {
        let key = Self::record_key(outpoint)?;
        self.tree.remove(key)?;
        Ok(())
    }

    pub fn lookup_by_hashlock(&self, hashlock: &Hash256) -> Result<Option<OutPoint>, StorageError> {
        let hk = Self::hashlock_key(0, hashlock);
        match self.tree.get(hk)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn erase_hashlock_index(&self, hashlock: &Hash256) -> Result<(), StorageError> {
        self.tree.remove(Self::hashlock_key(0, hashlock))?;
        Ok(())
    }

    /// Three-secret variant: each of the three hashlocks is indexed in its
    /// own slot (0, 1, 2) so a claim can look any one of them up directly.
    pub fn put_3s(&self, record: &Htlc3sRecord) -> Result<(), StorageError> {
        let key = Self::record_key_3s(&record.htlc_outpoint)?;
        self.tree.insert(key, encode(record)?)?;
        for (slot, hashlock) in record.hashlocks.iter().enumerate() {
            let hk = Self::hashlock_key(slot as u8, hashlock);
            self.tree.insert(hk, encode(&record.htlc_outpoint)?)?;
        }
        Ok(())
    }

    pub fn get_3s(&self, outpoint: &OutPoint) -> Result<Option<Htlc3sRecord>, StorageError> {
        let key = Self::record_key_3s(outpoint)?;
        match self.tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_3s(&self, record: &Htlc3sRecord) -> Result<(), StorageError> {
        let key = Self::record_key_3s(&record.htlc_outpoint)?;
        self.tree.insert(key, encode(record)?)?;
        Ok(())
    }

    /// Mirror of [`HtlcStore::remove`] for the three-secret variant.
    pub fn remove_3s(&self, outpoint: &OutPoint) -> Result<(), StorageError> {
        let key = Self::record_key_3s(outpoint)?;
        self.tree.remove(key)?;
        Ok(())
    }

    pub fn lookup_by_hashlock_slot(
        &self,
        slot: u8,
        hashlock: &Hash256,
    ) -> Result<Option<OutPoint>, StorageError> {
        match self.tree.get(Self::hashlock_key(slot, hashlock))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn erase_hashlock_index_slot(&self, slot: u8, hashlock: &Hash256) -> Result<(), StorageError> {
        self.tree.remove(Self::hashlock_key(slot, hashlock))?;
        Ok(())
    }

    pub fn put_create_undo(&self, txid: &Hash256, undo: &HtlcCreateUndo) -> Result<(), StorageError> {
        self.tree.insert(prefixed_key(b'c', txid), encode(undo)?)?;
        Ok(())
    }

    pub fn take_create_undo(&self, txid: &Hash256) -> Result<Option<HtlcCreateUndo>, StorageError> {
        match self.tree.remove(prefixed_key(b'c', txid))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_resolve_undo(&self, txid: &Hash256, undo: &HtlcResolveUndo) -> Result<(), StorageError> {
        self.tree.insert(prefixed_key(b'r', txid), encode(undo)?)?;
        Ok(())
    }

    pub fn take_resolve_undo(&self, txid: &Hash256) -> Result<Option<HtlcResolveUndo>, StorageError> {
        match self.tree.remove(prefixed_key(b'r', txid))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_resolve_undo_3s(
        &self,
        txid: &Hash256,
        undo: &Htlc3sResolveUndo,
    ) -> Result<(), StorageError> {
        self.tree.insert(prefixed_key(b'R', txid), encode(undo)?)?;
        Ok(())
    }

    pub fn take_resolve_undo_3s(
        &self,
        txid: &Hash256,
    ) -> Result<Option<Htlc3sResolveUndo>, StorageError> {
        match self.tree.remove(prefixed_key(b'R', txid))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn wipe(&self) -> Result<(), StorageError> {
        self.tree.clear()?;
        Ok(())
    }
}

impl CommitParticipant for HtlcStore {
    fn best_block_height(&self) -> Result<Option<u64>, StorageError> {
        match self.best_block.get(b"best")? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::DatabaseOp("corrupt HTLC best-block".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn set_best_block_height(&self, height: u64) -> Result<(), StorageError> {
        self.best_block.insert(b"best", &height.to_be_bytes())?;
        Ok(())
    }
}

/// Finality DB: `F ∥ block_hash → FinalityRecord`.
pub struct FinalityDb {
    tree: sled::Tree,
    best_block: sled::Tree,
}

impl FinalityDb {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("finality").map_err(|e| StorageError::DatabaseOpen {
            name: "finality".into(),
            source: e,
        })?;
        let best_block =
            db.open_tree("finality_meta")
                .map_err(|e| StorageError::DatabaseOpen {
                    name: "finality_meta".into(),
                    source: e,
                })?;
        Ok(Self { tree, best_block })
    }

    fn key(block_hash: &Hash256) -> Vec<u8> {
        prefixed_key(b'F', block_hash)
    }

    pub fn put(
        &self,
        block_hash: &Hash256,
        record: &crate::types::FinalityRecord,
    ) -> Result<(), StorageError> {
        self.tree.insert(Self::key(block_hash), encode(record)?)?;
        Ok(())
    }

    pub fn get(
        &self,
        block_hash: &Hash256,
    ) -> Result<Option<crate::types::FinalityRecord>, StorageError> {
        match self.tree.get(Self::key(block_hash))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, block_hash: &Hash256) -> Result<(), StorageError> {
        self.tree.remove(Self::key(block_hash))?;
        Ok(())
    }

    /// Iterate every persisted finality record, for boot-time recovery.
    pub fn iter_all(&self) -> impl Iterator<Item = crate::types::FinalityRecord> + '_ {
        self.tree.iter().filter_map(|item| {
            let (_, value) = item.ok()?;
            decode(&value).ok()
        })
    }
}

impl CommitParticipant for FinalityDb {
    fn best_block_height(&self) -> Result<Option<u64>, StorageError> {
        match self.best_block.get(b"best")? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::DatabaseOp("corrupt finality best-block".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn set_best_block_height(&self, height: u64) -> Result<(), StorageError> {
        self.best_block.insert(b"best", &height.to_be_bytes())?;
        Ok(())
    }
}

/// Opaque collaborator store (Burn-claim DB / BTC-headers DB, §6). The real
/// content is out of scope (§1); it only needs to carry the best-block /
/// all-committed contract so the atomic committer can detect torn commits
/// if one of these were ever added to the commit cycle (§4.8 design note).
pub struct OpaqueCollaboratorStore {
    best_block: sled::Tree,
}

impl OpaqueCollaboratorStore {
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, StorageError> {
        let best_block = db.open_tree(name).map_err(|e| StorageError::DatabaseOpen {
            name: name.to_string(),
            source: e,
        })?;
        Ok(Self { best_block })
    }
}

impl CommitParticipant for OpaqueCollaboratorStore {
    fn best_block_height(&self) -> Result<Option<u64>, StorageError> {
        match self.best_block.get(b"best")? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::DatabaseOp("corrupt collaborator best-block".into()))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    fn set_best_block_height(&self, height: u64) -> Result<(), StorageError> {
        self.best_block.insert(b"best", &height.to_be_bytes())?;
        Ok(())
    }
}

/// Bundles every logical store behind one open `sled::Db`, matching §6.
pub struct Stores {
    pub db: sled::Db,
    pub settlement: Arc<SettlementStore>,
    pub htlc: Arc<HtlcStore>,
    pub finality: Arc<FinalityDb>,
    pub burn_claim: Arc<OpaqueCollaboratorStore>,
    pub btc_headers: Arc<OpaqueCollaboratorStore>,
}

impl Stores {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .flush_every_ms(Some(1000))
            .open()
            .map_err(|e| StorageError::DatabaseOpen {
                name: path.to_string(),
                source: e,
            })?;
        Ok(Self {
            settlement: Arc::new(SettlementStore::open(&db)?),
            htlc: Arc::new(HtlcStore::open(&db)?),
            finality: Arc::new(FinalityDb::open(&db)?),
            burn_claim: Arc::new(OpaqueCollaboratorStore::open(&db, "burn_claim")?),
            btc_headers: Arc::new(OpaqueCollaboratorStore::open(&db, "btc_headers")?),
            db,
        })
    }

    /// §4.8 crash recovery: compare every store's best-block marker against
    /// the all-committed marker. Disagreement means a torn commit.
    pub fn detect_torn_commit(&self) -> Result<bool, StorageError> {
        let all_committed = self.settlement.all_committed_height()?;
        let markers = [
            self.settlement.best_block_height()?,
            self.htlc.best_block_height()?,
            self.finality.best_block_height()?,
            self.burn_claim.best_block_height()?,
            self.btc_headers.best_block_height()?,
        ];
        Ok(markers.iter().any(|m| *m != all_committed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, Stores) {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path().to_str().unwrap()).unwrap();
        (dir, stores)
    }

    #[test]
    fn vault_round_trips() {
        let (_dir, stores) = open_temp();
        let vault = Vault {
            outpoint: OutPoint::new([1u8; 32], 0),
            amount: 1_000,
            lock_height: 10,
        };
        stores.settlement.put_vault(&vault).unwrap();
        let fetched = stores.settlement.get_vault(&vault.outpoint).unwrap().unwrap();
        assert_eq!(fetched, vault);
        stores.settlement.remove_vault(&vault.outpoint).unwrap();
        assert!(stores.settlement.get_vault(&vault.outpoint).unwrap().is_none());
    }

    #[test]
    fn fresh_stores_agree_on_markers() {
        let (_dir, stores) = open_temp();
        assert!(!stores.detect_torn_commit().unwrap());
    }

    #[test]
    fn torn_commit_detected_when_markers_diverge() {
        let (_dir, stores) = open_temp();
        stores.settlement.set_best_block_height(5).unwrap();
        stores.settlement.set_all_committed_height(5).unwrap();
        stores.htlc.set_best_block_height(4).unwrap();
        assert!(stores.detect_torn_commit().unwrap());
    }
}
