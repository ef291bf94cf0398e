//! C1 — Deterministic Masternode Registry.
//!
//! The set of registered masternodes as of a given block height must be
//! reconstructible purely by replaying the chain's special transactions
//! (REGISTER / UPDATE_SERVICE / UPDATE_REGISTRAR / REVOKE) in order. This
//! store therefore holds only the *current tip* view; callers that need the
//! view "as of the previous block" simply call registry methods before
//! `process_block` is invoked for the block under validation, which is how
//! the scheduler (§4.2) and verifier (§4.3) are wired in practice.
//!
//! Authorization follows the same owner/operator split as the DIP3-style
//! registration scheme this protocol's terminology ("masternode", "PoSe
//! ban") is drawn from: `update-service` and `revoke` are authorized by the
//! operator key (it manages day-to-day liveness), `update-registrar` by the
//! owner key (it controls who the registrar is). See DESIGN.md for why this
//! choice was made — spec.md leaves the exact wire authorization open.

use crate::crypto::{self, CryptoError};
use crate::error::StorageError;
use crate::types::{Hash256, MasternodeRecord, MnId, OperatorPubKey, OutPoint, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("duplicate owner key hash")]
    DuplicateOwnerKey,

    #[error("masternode {0:?} not found")]
    NotFound(MnId),

    #[error("masternode {0:?} already registered")]
    AlreadyRegistered(MnId),

    #[error("update-service rejected: wrong operator")]
    WrongOperator,

    #[error("update-registrar rejected: wrong owner")]
    WrongOwner,

    #[error("malformed special-transaction payload: {0}")]
    MalformedPayload(String),

    #[error("signature invalid: {0}")]
    BadSignature(#[from] CryptoError),

    #[error("masternode is PoSe-banned and cannot be amended without revoke/re-register")]
    Banned,
}

impl From<sled::Error> for RegistryError {
    fn from(e: sled::Error) -> Self {
        RegistryError::Storage(StorageError::from(e))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub mn_id: MnId,
    pub operator_pubkey: OperatorPubKey,
    pub collateral_outpoint: OutPoint,
    pub payout_script: Vec<u8>,
    pub owner_key_hash: Hash256,
    pub voting_key_hash: Hash256,
    pub service_endpoint: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateServicePayload {
    pub mn_id: MnId,
    pub new_service_endpoint: String,
    /// DER ECDSA signature by the MN's current operator key over
    /// `mn_id ∥ new_service_endpoint`.
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRegistrarPayload {
    pub mn_id: MnId,
    pub owner_pubkey: OperatorPubKey,
    pub new_owner_key_hash: Hash256,
    pub new_voting_key_hash: Hash256,
    /// DER ECDSA signature by the current owner key over
    /// `mn_id ∥ new_owner_key_hash ∥ new_voting_key_hash`.
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevokePayload {
    pub mn_id: MnId,
    /// DER ECDSA signature by the MN's current operator key over `mn_id`.
    pub signature: Vec<u8>,
}

/// Undo data for a single special-transaction application, keyed by txid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RegistryUndo {
    Register { mn_id: MnId },
    UpdateService { mn_id: MnId, prior: MasternodeRecord },
    UpdateRegistrar { mn_id: MnId, prior: MasternodeRecord },
    Revoke { prior: MasternodeRecord },
}

pub struct MasternodeRegistry {
    db: sled::Db,
    records: sled::Tree,
    owner_index: sled::Tree,
    undo: sled::Tree,
}

fn sign_msg(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

impl MasternodeRegistry {
    pub fn open(db: sled::Db) -> Result<Self, RegistryError> {
        let records = db
            .open_tree("registry_records")
            .map_err(|e| StorageError::DatabaseOpen {
                name: "registry_records".into(),
                source: e,
            })?;
        let owner_index =
            db.open_tree("registry_owner_index")
                .map_err(|e| StorageError::DatabaseOpen {
                    name: "registry_owner_index".into(),
                    source: e,
                })?;
        let undo = db
            .open_tree("registry_undo")
            .map_err(|e| StorageError::DatabaseOpen {
                name: "registry_undo".into(),
                source: e,
            })?;
        Ok(Self {
            db,
            records,
            owner_index,
            undo,
        })
    }

    /// View of the MN set at chain tip (the only view this store holds).
    pub fn list_at(&self) -> Vec<MasternodeRecord> {
        self.records
            .iter()
            .values()
            .filter_map(|v| v.ok().and_then(|b| bincode::deserialize(&b).ok()))
            .collect()
    }

    pub fn get(&self, id: &MnId) -> Option<MasternodeRecord> {
        self.records
            .get(id)
            .ok()
            .flatten()
            .and_then(|b| bincode::deserialize(&b).ok())
    }

    pub fn get_valid(&self, id: &MnId) -> Option<MasternodeRecord> {
        self.get(id).filter(|r| r.is_valid())
    }

    pub fn for_each(&self, only_valid: bool, mut f: impl FnMut(&MasternodeRecord)) {
        let mut records = self.list_at();
        records.sort_by_key(|r| r.mn_id);
        for r in &records {
            if only_valid && !r.is_valid() {
                continue;
            }
            f(r);
        }
    }

    /// Operator-centric lookup: every MN whose operator key matches.
    /// One operator key may manage many MNs (§9 design note).
    pub fn get_by_operator_key(&self, pubkey: &OperatorPubKey) -> Vec<MasternodeRecord> {
        let mut out: Vec<MasternodeRecord> = self
            .list_at()
            .into_iter()
            .filter(|r| &r.operator_pubkey == pubkey)
            .collect();
        out.sort_by_key(|r| r.mn_id);
        out
    }

    fn put_record(&self, record: &MasternodeRecord) -> Result<(), RegistryError> {
        let bytes = bincode::serialize(record).map_err(|e| StorageError::Serialization(e))?;
        self.records.insert(record.mn_id, bytes)?;
        Ok(())
    }

    fn put_undo(&self, txid: &Hash256, undo: &RegistryUndo) -> Result<(), RegistryError> {
        let bytes = bincode::serialize(undo).map_err(|e| StorageError::Serialization(e))?;
        self.undo.insert(txid, bytes)?;
        Ok(())
    }

    fn take_undo(&self, txid: &Hash256) -> Result<Option<RegistryUndo>, RegistryError> {
        match self.undo.remove(txid)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| StorageError::Serialization(e))?,
            )),
            None => Ok(None),
        }
    }

    fn register(
        &self,
        payload: &RegisterPayload,
        height: u64,
        txid: &Hash256,
    ) -> Result<(), RegistryError> {
        if self.get(&payload.mn_id).is_some() {
            return Err(RegistryError::AlreadyRegistered(payload.mn_id));
        }
        if self.owner_index.contains_key(payload.owner_key_hash)? {
            return Err(RegistryError::DuplicateOwnerKey);
        }
        let record = MasternodeRecord {
            mn_id: payload.mn_id,
            operator_pubkey: payload.operator_pubkey,
            collateral_outpoint: payload.collateral_outpoint,
            payout_script: payload.payout_script.clone(),
            owner_key_hash: payload.owner_key_hash,
            voting_key_hash: payload.voting_key_hash,
            service_endpoint: payload.service_endpoint.clone(),
            registered_height: height,
            confirmation_height: None,
            pose_banned: false,
            penalty_score: 0,
        };
        self.put_record(&record)?;
        self.owner_index
            .insert(payload.owner_key_hash, payload.mn_id.as_slice())?;
        self.put_undo(txid, &RegistryUndo::Register { mn_id: payload.mn_id })?;
        info!(mn_id = %hex::encode(payload.mn_id), height, "masternode registered");
        Ok(())
    }

    fn update_service(
        &self,
        payload: &UpdateServicePayload,
        txid: &Hash256,
    ) -> Result<(), RegistryError> {
        let mut record = self
            .get(&payload.mn_id)
            .ok_or(RegistryError::NotFound(payload.mn_id))?;
        if record.pose_banned {
            return Err(RegistryError::Banned);
        }
        let msg = sign_msg(&[&payload.mn_id, payload.new_service_endpoint.as_bytes()]);
        crypto::verify_block_signature(
            &record.operator_pubkey,
            &crypto::sha256(&msg),
            &payload.signature,
        )
        .map_err(|_| RegistryError::WrongOperator)?;

        let prior = record.clone();
        record.service_endpoint = payload.new_service_endpoint.clone();
        self.put_record(&record)?;
        self.put_undo(
            txid,
            &RegistryUndo::UpdateService {
                mn_id: payload.mn_id,
                prior,
            },
        )?;
        Ok(())
    }

    fn update_registrar(
        &self,
        payload: &UpdateRegistrarPayload,
        txid: &Hash256,
    ) -> Result<(), RegistryError> {
        let mut record = self
            .get(&payload.mn_id)
            .ok_or(RegistryError::NotFound(payload.mn_id))?;
        if record.pose_banned {
            return Err(RegistryError::Banned);
        }
        if crypto::sha256(&payload.owner_pubkey) != record.owner_key_hash {
            return Err(RegistryError::WrongOwner);
        }
        let msg = sign_msg(&[
            &payload.mn_id,
            &payload.new_owner_key_hash,
            &payload.new_voting_key_hash,
        ]);
        crypto::verify_block_signature(&payload.owner_pubkey, &crypto::sha256(&msg), &payload.signature)
            .map_err(|_| RegistryError::WrongOwner)?;

        if payload.new_owner_key_hash != record.owner_key_hash
            && self.owner_index.contains_key(payload.new_owner_key_hash)?
        {
            return Err(RegistryError::DuplicateOwnerKey);
        }

        let prior = record.clone();
        self.owner_index.remove(record.owner_key_hash)?;
        record.owner_key_hash = payload.new_owner_key_hash;
        record.voting_key_hash = payload.new_voting_key_hash;
        self.owner_index
            .insert(record.owner_key_hash, record.mn_id.as_slice())?;
        self.put_record(&record)?;
        self.put_undo(
            txid,
            &RegistryUndo::UpdateRegistrar {
                mn_id: payload.mn_id,
                prior,
            },
        )?;
        Ok(())
    }

    fn revoke(&self, payload: &RevokePayload, txid: &Hash256) -> Result<(), RegistryError> {
        let record = self
            .get(&payload.mn_id)
            .ok_or(RegistryError::NotFound(payload.mn_id))?;
        crypto::verify_block_signature(
            &record.operator_pubkey,
            &crypto::sha256(&payload.mn_id),
            &payload.signature,
        )
        .map_err(|_| RegistryError::WrongOperator)?;

        let prior = record.clone();
        self.records.remove(payload.mn_id)?;
        self.owner_index.remove(record.owner_key_hash)?;
        self.put_undo(txid, &RegistryUndo::Revoke { prior })?;
        info!(mn_id = %hex::encode(payload.mn_id), "masternode revoked");
        Ok(())
    }

    /// Record a confirmation once the registration's collateral has matured
    /// `vote_maturity_blocks` (driven by the scheduler's bootstrap check,
    /// §4.2); not itself a special transaction.
    pub fn confirm(&self, mn_id: &MnId, height: u64) -> Result<(), RegistryError> {
        if let Some(mut record) = self.get(mn_id) {
            if record.confirmation_height.is_none() {
                record.confirmation_height = Some(height);
                self.put_record(&record)?;
            }
        }
        Ok(())
    }

    pub fn apply_penalty(&self, mn_id: &MnId, amount: u32, ban_ceiling: u32) -> Result<(), RegistryError> {
        if let Some(mut record) = self.get(mn_id) {
            record.penalty_score = record.penalty_score.saturating_add(amount);
            if record.penalty_score >= ban_ceiling {
                record.pose_banned = true;
                warn!(mn_id = %hex::encode(mn_id), score = record.penalty_score, "masternode PoSe-banned");
            }
            self.put_record(&record)?;
        }
        Ok(())
    }

    /// Apply every registry-relevant special transaction in `block.tx` order
    /// (§5 ordering guarantee).
    pub fn process_block(&self, txs: &[Transaction], height: u64) -> Result<(), RegistryError> {
        use crate::types::SpecialTxType::*;
        for tx in txs {
            let Some(special_type) = tx.special_type() else {
                continue;
            };
            let Some(payload) = tx.special_payload() else {
                continue;
            };
            let txid = tx.txid();
            match special_type {
                Register => {
                    let p: RegisterPayload = bincode::deserialize(payload)
                        .map_err(|e| RegistryError::MalformedPayload(e.to_string()))?;
                    self.register(&p, height, &txid)?;
                }
                UpdateService => {
                    let p: UpdateServicePayload = bincode::deserialize(payload)
                        .map_err(|e| RegistryError::MalformedPayload(e.to_string()))?;
                    self.update_service(&p, &txid)?;
                }
                UpdateRegistrar => {
                    let p: UpdateRegistrarPayload = bincode::deserialize(payload)
                        .map_err(|e| RegistryError::MalformedPayload(e.to_string()))?;
                    self.update_registrar(&p, &txid)?;
                }
                Revoke => {
                    let p: RevokePayload = bincode::deserialize(payload)
                        .map_err(|e| RegistryError::MalformedPayload(e.to_string()))?;
                    self.revoke(&p, &txid)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Inverse of `process_block`, applied in reverse transaction order for
    /// a reorg (§3 "reorgs undo through the inverse operation").
    pub fn undo_block(&self, txs: &[Transaction]) -> Result<(), RegistryError> {
        for tx in txs.iter().rev() {
            if tx.special_type().is_none() {
                continue;
            }
            let txid = tx.txid();
            match self.take_undo(&txid)? {
                Some(RegistryUndo::Register { mn_id }) => {
                    if let Some(record) = self.get(&mn_id) {
                        self.owner_index.remove(record.owner_key_hash)?;
                    }
                    self.records.remove(mn_id)?;
                }
                Some(RegistryUndo::UpdateService { mn_id, prior }) => {
                    let _ = mn_id;
                    self.put_record(&prior)?;
                }
                Some(RegistryUndo::UpdateRegistrar { mn_id, prior }) => {
                    if let Some(current) = self.get(&mn_id) {
                        self.owner_index.remove(current.owner_key_hash)?;
                    }
                    self.owner_index
                        .insert(prior.owner_key_hash, prior.mn_id.as_slice())?;
                    self.put_record(&prior)?;
                }
                Some(RegistryUndo::Revoke { prior }) => {
                    self.put_record(&prior)?;
                    self.owner_index
                        .insert(prior.owner_key_hash, prior.mn_id.as_slice())?;
                }
                None => {}
            }
        }
        Ok(())
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }
}

pub type MasternodeRegistryHandle = Arc<MasternodeRegistry>;
