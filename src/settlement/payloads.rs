//! Wire payloads for the settlement special-transaction types (§6).
//!
//! UNLOCK's canonical output layout has two optional slots (M1 change,
//! vault change) that are *structurally* indistinguishable from one
//! another — both are bare `OP_TRUE` outputs of the same shape. Rather than
//! inferring which-is-which from output count alone (ambiguous: three
//! `OP_TRUE`-shaped outputs could mean "fee + vault-backing + vault-change"
//! or other combinations), the payload declares the optional amounts
//! explicitly and the processor checks the declared layout against the
//! actual outputs. See DESIGN.md for this Open-Question resolution.

use crate::types::Hash256;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UnlockPayload {
    /// `Some(amount)` if `vout[1]` is an M1 change output of this amount.
    pub m1_change_amount: Option<u64>,
    /// `Some(amount)` if a fee output (and its 1:1 vault backing) is present.
    pub fee_amount: Option<u64>,
    /// `Some(amount)` if a trailing vault-change output is present.
    pub vault_change_amount: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcCreatePayload {
    pub hashlock: Hash256,
    pub expiry_height: u64,
    pub claim_key_hash: Hash256,
    pub refund_key_hash: Hash256,
    pub redeem_script: Vec<u8>,
    /// A follow-up HTLC to instantiate instead of minting a plain receipt
    /// when this HTLC is claimed (§4.7 "covenant continuation").
    pub covenant: Option<Box<HtlcCreatePayload>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcClaimPayload {
    pub preimage: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcRefundPayload {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcCreate3sPayload {
    pub hashlocks: [Hash256; 3],
    pub expiry_height: u64,
    pub claim_key_hash: Hash256,
    pub refund_key_hash: Hash256,
    pub redeem_script: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcClaim3sPayload {
    pub preimages: [[u8; 32]; 3],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HtlcRefund3sPayload {}
