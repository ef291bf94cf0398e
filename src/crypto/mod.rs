//! ECDSA (secp256k1) signing and verification helpers.
//!
//! Two signature shapes are used by the protocol:
//! - DER-encoded, non-recoverable: block signatures (§4.3). Verification
//!   looks the signer's operator key up in the registry, so recovery isn't
//!   needed.
//! - Compact recoverable (64-byte r||s plus a one-byte recovery id):
//!   finality signatures (§4.5) and the light-client proof (§4.10), both of
//!   which need to recover the signer's public key from the signature alone.

use crate::types::{Hash256, OperatorPubKey};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("public key recovery failed")]
    RecoveryFailed,
}

/// An operator keypair, held by the daemon's single managed operator identity.
#[derive(Clone)]
pub struct OperatorKeypair {
    signing_key: SigningKey,
}

impl OperatorKeypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes(bytes.into()).map_err(|_| CryptoError::MalformedPublicKey)?;
        Ok(Self { signing_key })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    pub fn public_key(&self) -> OperatorPubKey {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Sign a block content hash, producing a DER-encoded ECDSA signature.
    pub fn sign_block_hash(&self, block_hash: &Hash256) -> Vec<u8> {
        let sig: Signature = self.signing_key.sign(block_hash);
        sig.to_der().as_bytes().to_vec()
    }

    /// Sign `"HUSIG" ∥ block_hash` with a compact recoverable signature
    /// (64 bytes r||s plus a trailing one-byte recovery id = 65 bytes).
    pub fn sign_finality_message(&self, block_hash: &Hash256) -> Vec<u8> {
        let msg = finality_message(block_hash);
        sign_recoverable(&self.signing_key, &msg)
    }
}

pub fn finality_message(block_hash: &Hash256) -> Vec<u8> {
    let mut msg = Vec::with_capacity(5 + 32);
    msg.extend_from_slice(b"HUSIG");
    msg.extend_from_slice(block_hash);
    msg
}

fn sign_recoverable(signing_key: &SigningKey, msg: &[u8]) -> Vec<u8> {
    let (sig, recid): (Signature, RecoveryId) = signing_key
        .sign_recoverable(msg)
        .expect("recoverable ECDSA signing cannot fail for a valid key");
    let mut out = Vec::with_capacity(65);
    out.extend_from_slice(&sig.to_bytes());
    out.push(recid.to_byte());
    out
}

/// Verify a DER-encoded block signature against a known operator key.
///
/// Rejects signatures outside the DER-typical 64–73 byte range before even
/// attempting to parse them, per §4.3.
pub fn verify_block_signature(
    pubkey: &OperatorPubKey,
    block_hash: &Hash256,
    sig_der: &[u8],
) -> Result<(), CryptoError> {
    if !(64..=73).contains(&sig_der.len()) {
        return Err(CryptoError::MalformedSignature);
    }
    let verifying_key =
        VerifyingKey::from_sec1_bytes(pubkey).map_err(|_| CryptoError::MalformedPublicKey)?;
    let sig = Signature::from_der(sig_der).map_err(|_| CryptoError::MalformedSignature)?;
    verifying_key
        .verify(block_hash, &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Recover the public key that produced a compact recoverable signature over
/// `"HUSIG" ∥ block_hash`.
pub fn recover_finality_signer(
    block_hash: &Hash256,
    sig65: &[u8],
) -> Result<OperatorPubKey, CryptoError> {
    if sig65.len() != 65 {
        return Err(CryptoError::MalformedSignature);
    }
    let msg = finality_message(block_hash);
    let sig = Signature::from_slice(&sig65[..64]).map_err(|_| CryptoError::MalformedSignature)?;
    let recid = RecoveryId::from_byte(sig65[64]).ok_or(CryptoError::MalformedSignature)?;
    let verifying_key = VerifyingKey::recover_from_msg(&msg, &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    let point = verifying_key.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

pub fn sha256(data: &[u8]) -> Hash256 {
    use sha2::{Digest, Sha256};
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_signature_round_trips() {
        let kp = OperatorKeypair::generate();
        let hash = sha256(b"a block");
        let sig = kp.sign_block_hash(&hash);
        assert!(verify_block_signature(&kp.public_key(), &hash, &sig).is_ok());
    }

    #[test]
    fn finality_signature_recovers_signer() {
        let kp = OperatorKeypair::generate();
        let hash = sha256(b"a block");
        let sig = kp.sign_finality_message(&hash);
        let recovered = recover_finality_signer(&hash, &sig).unwrap();
        assert_eq!(recovered, kp.public_key());
    }

    #[test]
    fn block_signature_rejects_short_signature() {
        let kp = OperatorKeypair::generate();
        let hash = sha256(b"x");
        assert!(verify_block_signature(&kp.public_key(), &hash, &[0u8; 10]).is_err());
    }
}
