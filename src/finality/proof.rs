//! C10 — Light-Client Finality Proof (§4.10).
//!
//! A self-contained, independently verifiable bundle proving a block reached
//! finality, without requiring the verifier to hold a full masternode
//! registry: it carries its own `signer_state` (the `(mn_id,
//! operator_pubkey)` pairs the signatures are checked against) alongside the
//! signatures themselves.

use crate::crypto::{self, CryptoError};
use crate::masternode_registry::MasternodeRegistry;
use crate::types::{FinalityRecord, Hash256, MnId, OperatorPubKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("too few valid signatures: {valid} < threshold {threshold}")]
    BelowThreshold { valid: usize, threshold: usize },
    #[error("signer {0:?} in proof is not a known masternode")]
    UnknownSigner(MnId),
}

/// One signer's contribution to the proof: its declared identity and the
/// signature it produced over `"HUSIG" ∥ block_hash`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofSignature {
    pub mn_id: MnId,
    pub operator_pubkey: OperatorPubKey,
    pub signature_bytes: Vec<u8>,
}

/// The full light-client proof: everything needed to independently verify
/// that a block reached finality, with no dependency on chain state beyond
/// what's embedded here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalityProof {
    pub block_hash: Hash256,
    pub height: u64,
    pub quorum_size: usize,
    pub threshold: usize,
    pub signatures: Vec<ProofSignature>,
}

/// Assemble a proof from an accumulated [`FinalityRecord`], resolving each
/// signer's operator key from the registry so the proof is self-contained.
pub fn build_proof(
    record: &FinalityRecord,
    registry: &MasternodeRegistry,
    quorum_size: usize,
    threshold: usize,
) -> Result<FinalityProof, ProofError> {
    let mut signatures = Vec::with_capacity(record.signatures.len());
    for (mn_id, signature_bytes) in &record.signatures {
        let operator_pubkey = registry
            .get(mn_id)
            .ok_or(ProofError::UnknownSigner(*mn_id))?
            .operator_pubkey;
        signatures.push(ProofSignature {
            mn_id: *mn_id,
            operator_pubkey,
            signature_bytes: signature_bytes.clone(),
        });
    }
    Ok(FinalityProof {
        block_hash: record.block_hash,
        height: record.height,
        quorum_size,
        threshold,
        signatures,
    })
}

/// Verify a proof with no access to chain state: recover each signature's
/// signer, check it against the claimed `operator_pubkey`, and require at
/// least `proof.threshold` valid signatures. A malformed or mismatched
/// individual signature is simply not counted, not fatal to the whole proof.
pub fn verify_proof(proof: &FinalityProof) -> Result<usize, ProofError> {
    let mut valid = 0usize;
    for sig in &proof.signatures {
        match crypto::recover_finality_signer(&proof.block_hash, &sig.signature_bytes) {
            Ok(recovered) if recovered == sig.operator_pubkey => valid += 1,
            _ => continue,
        }
    }
    if valid < proof.threshold {
        return Err(ProofError::BelowThreshold {
            valid,
            threshold: proof.threshold,
        });
    }
    Ok(valid)
}

/// Optional stricter check (§4.10): additionally require every signer MN in
/// the proof to be present in a supplied MN id list, e.g. a light client's
/// cached snapshot of the registry at the proof's height.
pub fn verify_proof_against_mn_list(proof: &FinalityProof, known_mns: &[MnId]) -> Result<usize, ProofError> {
    for sig in &proof.signatures {
        if !known_mns.contains(&sig.mn_id) {
            return Err(ProofError::UnknownSigner(sig.mn_id));
        }
    }
    verify_proof(proof)
}
