//! C5 — Finality Signature Aggregator (§4.5).
//!
//! Accepts one masternode's recoverable-ECDSA finality signature per block,
//! verifies the recovered key against the registry and the block's quorum,
//! runs it past the double-sign recorder, and persists the accumulating
//! [`FinalityRecord`] until `quorum_threshold` is reached. Quorum
//! *membership* is decided per-operator (§9 design note); the *threshold*
//! that finalizes a block counts raw per-masternode signatures, so one
//! operator running several quorum-eligible masternodes can contribute
//! several signatures toward the same block's threshold.

use crate::crypto::{self, CryptoError};
use crate::masternode_registry::MasternodeRegistry;
use crate::quorum::Quorum;
use crate::slashing::SlashingRecorder;
use crate::storage::FinalityDb;
use crate::types::{FinalityRecord, FinalitySignature, Hash256, MnId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::constants::finality::{RATE_LIMIT_MAX_PER_WINDOW, RATE_LIMIT_WINDOW_SECS};

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("unknown signer masternode")]
    UnknownSigner,

    #[error("recovered key does not match signer's registered operator key")]
    WrongSigner,

    #[error("signer's operator is not a member of this block's quorum")]
    NotQuorumMember,

    #[error("duplicate signature from this signer for this block")]
    Duplicate,

    #[error("signature rate limit exceeded for this peer")]
    RateLimited,

    #[error("double-sign: masternode already signed a conflicting block at this height")]
    DoubleSign,
}

impl AggregatorError {
    pub fn reject_kind(&self) -> crate::error::RejectKind {
        use crate::error::RejectKind;
        match self {
            AggregatorError::Storage(_) => RejectKind::Transient,
            AggregatorError::Crypto(_) | AggregatorError::WrongSigner | AggregatorError::DoubleSign => {
                RejectKind::Signature
            }
            AggregatorError::UnknownSigner | AggregatorError::NotQuorumMember | AggregatorError::Duplicate => {
                RejectKind::Policy
            }
            AggregatorError::RateLimited => RejectKind::RateLimit,
        }
    }
}

pub type PeerId = [u8; 32];

pub struct AcceptOutcome {
    pub threshold_reached: bool,
    pub signature_count: usize,
}

/// One node's view of the accumulating finality signatures. Holds no chain
/// state of its own beyond the peer rate-limit table; everything else lives
/// in the shared [`FinalityDb`] and [`MasternodeRegistry`].
pub struct FinalityAggregator {
    db: Arc<FinalityDb>,
    registry: Arc<MasternodeRegistry>,
    slashing: Arc<SlashingRecorder>,
    quorum_threshold: usize,
    rate_limits: Mutex<HashMap<PeerId, Vec<i64>>>,
}

impl FinalityAggregator {
    pub fn new(
        db: Arc<FinalityDb>,
        registry: Arc<MasternodeRegistry>,
        slashing: Arc<SlashingRecorder>,
        quorum_threshold: usize,
    ) -> Self {
        Self {
            db,
            registry,
            slashing,
            quorum_threshold,
            rate_limits: Mutex::new(HashMap::new()),
        }
    }

    fn check_rate_limit(&self, peer: PeerId, now: i64) -> Result<(), AggregatorError> {
        let mut limits = self.rate_limits.lock();
        let entry = limits.entry(peer).or_default();
        entry.retain(|t| now - *t < RATE_LIMIT_WINDOW_SECS as i64);
        if entry.len() as u32 >= RATE_LIMIT_MAX_PER_WINDOW {
            return Err(AggregatorError::RateLimited);
        }
        entry.push(now);
        Ok(())
    }

    /// Accept one finality-signature P2P message (§6's new message type) on
    /// behalf of `peer`, checked against `quorum` (the selected quorum for
    /// this signature's block, per C4).
    pub fn accept_signature(
        &self,
        sig: &FinalitySignature,
        peer: PeerId,
        quorum: &Quorum,
        now: i64,
    ) -> Result<AcceptOutcome, AggregatorError> {
        self.check_rate_limit(peer, now)?;

        let signer_record = self
            .registry
            .get(&sig.signer_mn_id)
            .ok_or(AggregatorError::UnknownSigner)?;

        let recovered = crypto::recover_finality_signer(&sig.block_hash, &sig.signature_bytes)?;
        if recovered != signer_record.operator_pubkey {
            return Err(AggregatorError::WrongSigner);
        }
        if !quorum.is_member(&signer_record.operator_pubkey) {
            return Err(AggregatorError::NotQuorumMember);
        }

        if self
            .slashing
            .record(
                sig.height,
                sig.signer_mn_id,
                sig.block_hash,
                sig.signature_bytes.clone(),
                &self.registry,
                now,
            )
            .is_some()
        {
            return Err(AggregatorError::DoubleSign);
        }

        let mut record = self
            .db
            .get(&sig.block_hash)?
            .unwrap_or_else(|| FinalityRecord::new(sig.block_hash, sig.height));
        if !record.insert(sig.signer_mn_id, sig.signature_bytes.clone()) {
            return Err(AggregatorError::Duplicate);
        }
        let signature_count = record.count();
        self.db.put(&sig.block_hash, &record)?;

        let threshold_reached = signature_count >= self.quorum_threshold;
        if threshold_reached {
            info!(
                height = sig.height,
                block_hash = %hex::encode(sig.block_hash),
                signature_count,
                "finality threshold reached"
            );
        }
        Ok(AcceptOutcome {
            threshold_reached,
            signature_count,
        })
    }

    pub fn record_for(&self, block_hash: &Hash256) -> Result<Option<FinalityRecord>, AggregatorError> {
        Ok(self.db.get(block_hash)?)
    }
}
