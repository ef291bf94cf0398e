//! Core data types for the consensus and settlement engine.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Hash256 = [u8; 32];
pub type MnId = [u8; 32];
/// Compressed secp256k1 public key, 33 bytes.
pub type OperatorPubKey = [u8; 33];

/// The single-byte script that marks a vault or a fee/change receipt as
/// consensus-restricted rather than spendable by arbitrary script.
pub const OP_TRUE: u8 = 0x51;

pub fn is_op_true(script: &[u8]) -> bool {
    script.len() == 1 && script[0] == OP_TRUE
}

pub fn op_true_script() -> Vec<u8> {
    vec![OP_TRUE]
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn is_op_true(&self) -> bool {
        is_op_true(&self.script_pubkey)
    }
}

/// Fixed numeric tags for special-transaction types, per the wire protocol.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpecialTxType {
    Register = 1,
    UpdateService = 2,
    UpdateRegistrar = 3,
    Revoke = 4,
    Lock = 5,
    Unlock = 6,
    TransferM1 = 7,
    HtlcCreate = 8,
    HtlcClaim = 9,
    HtlcRefund = 10,
    HtlcCreate3s = 11,
    HtlcClaim3s = 12,
    HtlcRefund3s = 13,
    BurnClaim = 14,
    MintM0Btc = 15,
    BtcHeaders = 16,
}

impl SpecialTxType {
    pub fn from_u8(v: u8) -> Option<Self> {
        use SpecialTxType::*;
        Some(match v {
            1 => Register,
            2 => UpdateService,
            3 => UpdateRegistrar,
            4 => Revoke,
            5 => Lock,
            6 => Unlock,
            7 => TransferM1,
            8 => HtlcCreate,
            9 => HtlcClaim,
            10 => HtlcRefund,
            11 => HtlcCreate3s,
            12 => HtlcClaim3s,
            13 => HtlcRefund3s,
            14 => BurnClaim,
            15 => MintM0Btc,
            16 => BtcHeaders,
            _ => return None,
        })
    }

    /// Per-type payload size cap; header publication gets a larger cap.
    pub fn max_payload_bytes(self) -> usize {
        match self {
            SpecialTxType::BtcHeaders => 1_000_000,
            _ => 16_384,
        }
    }
}

/// A transaction carrying an optional special-type payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    pub timestamp: i64,
    /// `(type_tag, payload_bytes)`, absent for a plain M0 transfer.
    pub special: Option<(u8, Vec<u8>)>,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        let bytes = bincode::serialize(self).expect("transaction serialization cannot fail");
        Sha256::digest(bytes).into()
    }

    pub fn special_type(&self) -> Option<SpecialTxType> {
        self.special
            .as_ref()
            .and_then(|(tag, _)| SpecialTxType::from_u8(*tag))
    }

    pub fn special_payload(&self) -> Option<&[u8]> {
        self.special.as_ref().map(|(_, payload)| payload.as_slice())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UTXO {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

// ============================================================================
// C1 — Masternode registry record
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasternodeRecord {
    pub mn_id: MnId,
    pub operator_pubkey: OperatorPubKey,
    pub collateral_outpoint: OutPoint,
    pub payout_script: Vec<u8>,
    pub owner_key_hash: Hash256,
    pub voting_key_hash: Hash256,
    pub service_endpoint: String,
    pub registered_height: u64,
    pub confirmation_height: Option<u64>,
    pub pose_banned: bool,
    pub penalty_score: u32,
}

impl MasternodeRecord {
    pub fn is_valid(&self) -> bool {
        !self.pose_banned
    }

    pub fn is_confirmed_at(&self, height: u64) -> bool {
        matches!(self.confirmation_height, Some(h) if h <= height)
    }
}

// ============================================================================
// C7 — Settlement layer: vaults, receipts, HTLCs, snapshots
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vault {
    pub outpoint: OutPoint,
    pub amount: u64,
    pub lock_height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub outpoint: OutPoint,
    pub amount: u64,
    pub create_height: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum HtlcStatus {
    Active,
    Claimed,
    Refunded,
}

/// Single-hashlock HTLC record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HtlcRecord {
    pub htlc_outpoint: OutPoint,
    pub hashlock: Hash256,
    pub source_receipt: OutPoint,
    pub amount: u64,
    pub claim_key_hash: Hash256,
    pub refund_key_hash: Hash256,
    pub create_height: u64,
    pub expiry_height: u64,
    pub redeem_script: Vec<u8>,
    pub status: HtlcStatus,
    pub resolve_txid: Option<Hash256>,
    pub preimage: Option<[u8; 32]>,
    /// Serialized follow-up `HtlcCreatePayload`, set when this HTLC's claim
    /// pivots into a new HTLC instead of minting a plain receipt (§4.7).
    pub covenant: Option<Vec<u8>>,
}

/// Three-secret HTLC variant: three independent hashlocks, each indexed
/// separately; all three preimages must verify before a claim succeeds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Htlc3sRecord {
    pub htlc_outpoint: OutPoint,
    pub hashlocks: [Hash256; 3],
    pub source_receipt: OutPoint,
    pub amount: u64,
    pub claim_key_hash: Hash256,
    pub refund_key_hash: Hash256,
    pub create_height: u64,
    pub expiry_height: u64,
    pub redeem_script: Vec<u8>,
    pub status: HtlcStatus,
    pub resolve_txid: Option<Hash256>,
    pub preimages: Option<[[u8; 32]; 3]>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SettlementSnapshot {
    pub m0_vaulted: u64,
    pub m1_supply: u64,
    pub m0_shielded: u64,
    pub m0_total_supply: u64,
    pub burnclaims_block: u64,
    pub height: u64,
    pub block_hash: Hash256,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnlockUndo {
    pub spent_receipts: Vec<Receipt>,
    pub spent_vaults: Vec<Vault>,
    pub m0_released: u64,
    pub m1_net_burned: u64,
    pub change_receipts: Vec<OutPoint>,
    pub fee_receipt: Option<OutPoint>,
    pub fee_vault: Option<OutPoint>,
    pub vault_change: Option<OutPoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferUndo {
    pub original_receipt: Receipt,
    pub recipient_count: usize,
    pub fee_receipt: OutPoint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcCreateUndo {
    pub consumed_receipt: Receipt,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcResolveUndo {
    pub pre_resolve: HtlcRecord,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Htlc3sResolveUndo {
    pub pre_resolve: Htlc3sRecord,
}

// ============================================================================
// C5 — Finality signatures
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalitySignature {
    pub block_hash: Hash256,
    pub height: u64,
    pub signer_mn_id: MnId,
    pub signature_bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct FinalityRecord {
    pub block_hash: Hash256,
    pub height: u64,
    pub signatures: std::collections::BTreeMap<MnId, Vec<u8>>,
}

impl FinalityRecord {
    pub fn new(block_hash: Hash256, height: u64) -> Self {
        Self {
            block_hash,
            height,
            signatures: Default::default(),
        }
    }

    pub fn count(&self) -> usize {
        self.signatures.len()
    }

    pub fn contains(&self, mn_id: &MnId) -> bool {
        self.signatures.contains_key(mn_id)
    }

    pub fn insert(&mut self, mn_id: MnId, sig: Vec<u8>) -> bool {
        if self.signatures.contains_key(&mn_id) {
            return false;
        }
        self.signatures.insert(mn_id, sig);
        true
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoubleSignEvidence {
    pub mn_id: MnId,
    pub height: u64,
    pub block_hash_1: Hash256,
    pub sig_1: Vec<u8>,
    pub block_hash_2: Hash256,
    pub sig_2: Vec<u8>,
    pub detected_at: i64,
}
