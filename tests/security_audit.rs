//! §7 reject-kind taxonomy and DoS scoring: every component's error maps to
//! the right bucket, and the aggregator's signer-verification chain (unknown
//! signer, wrong signer, double-sign) each land in the bucket the peer
//! scoring policy expects.

use std::sync::Arc;
use timed::error::RejectKind;
use timed::finality::aggregator::{AggregatorError, FinalityAggregator};
use timed::masternode_registry::{MasternodeRegistry, RegisterPayload};
use timed::quorum::Quorum;
use timed::settlement::overlay::{HtlcOverlay, SettlementOverlay};
use timed::settlement::SettlementEngine;
use timed::slashing::SlashingRecorder;
use timed::storage::{FinalityDb, HtlcStore, SettlementStore};
use timed::types::{FinalitySignature, OutPoint, SpecialTxType, Transaction, TxOutput};

fn register(registry: &MasternodeRegistry, mn_id: [u8; 32], kp: &timed::crypto::OperatorKeypair) {
    let payload = RegisterPayload {
        mn_id,
        operator_pubkey: kp.public_key(),
        collateral_outpoint: OutPoint::new(mn_id, 0),
        payout_script: vec![0x51],
        owner_key_hash: mn_id,
        voting_key_hash: mn_id,
        service_endpoint: "127.0.0.1:1".into(),
    };
    let tx = Transaction {
        version: 1,
        inputs: vec![],
        outputs: vec![],
        lock_time: 0,
        timestamp: 0,
        special: Some((SpecialTxType::Register as u8, bincode::serialize(&payload).unwrap())),
    };
    registry.process_block(&[tx], 0).unwrap();
}

#[test]
fn reject_kind_dos_scores_match_the_taxonomy() {
    assert_eq!(RejectKind::Structural.dos_score(), Some(20));
    assert_eq!(RejectKind::Policy.dos_score(), Some(10));
    assert_eq!(RejectKind::Conservation.dos_score(), Some(40));
    assert_eq!(RejectKind::Signature.dos_score(), Some(40));
    assert_eq!(RejectKind::Timing.dos_score(), Some(5));
    assert_eq!(RejectKind::RateLimit.dos_score(), None);
    assert_eq!(RejectKind::Transient.dos_score(), None);
    assert_eq!(RejectKind::Fatal.dos_score(), None);
}

#[test]
fn aggregator_signer_verification_errors_map_to_expected_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let finality_db = Arc::new(FinalityDb::open(&db).unwrap());
    let registry = Arc::new(MasternodeRegistry::open(db).unwrap());
    let slashing = Arc::new(SlashingRecorder::new());
    let aggregator = FinalityAggregator::new(finality_db, registry.clone(), slashing, 1);

    let kp = timed::crypto::OperatorKeypair::generate();
    register(&registry, [1u8; 32], &kp);

    // Unregistered signer: Policy bucket.
    let impostor_kp = timed::crypto::OperatorKeypair::generate();
    let quorum = Quorum {
        cycle: 0,
        members: vec![kp.public_key()],
    };
    let block_hash = [1u8; 32];
    let sig = FinalitySignature {
        block_hash,
        height: 10,
        signer_mn_id: [9u8; 32], // never registered
        signature_bytes: impostor_kp.sign_finality_message(&block_hash),
    };
    let err = aggregator.accept_signature(&sig, [0u8; 32], &quorum, 1000).unwrap_err();
    assert!(matches!(err, AggregatorError::UnknownSigner));
    assert_eq!(err.reject_kind(), RejectKind::Policy);

    // Recovered key doesn't match the registered operator: Signature bucket.
    let wrong_sig = FinalitySignature {
        block_hash,
        height: 10,
        signer_mn_id: [1u8; 32], // registered to `kp`
        signature_bytes: impostor_kp.sign_finality_message(&block_hash), // signed with a different key
    };
    let err = aggregator
        .accept_signature(&wrong_sig, [0u8; 32], &quorum, 1001)
        .unwrap_err();
    assert!(matches!(err, AggregatorError::WrongSigner));
    assert_eq!(err.reject_kind(), RejectKind::Signature);

    // Not a quorum member: Policy bucket.
    let empty_quorum = Quorum { cycle: 0, members: vec![] };
    let valid_sig = FinalitySignature {
        block_hash,
        height: 10,
        signer_mn_id: [1u8; 32],
        signature_bytes: kp.sign_finality_message(&block_hash),
    };
    let err = aggregator
        .accept_signature(&valid_sig, [0u8; 32], &empty_quorum, 1002)
        .unwrap_err();
    assert!(matches!(err, AggregatorError::NotQuorumMember));
    assert_eq!(err.reject_kind(), RejectKind::Policy);
}

#[test]
fn double_sign_surfaces_through_the_aggregator_as_a_signature_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let finality_db = Arc::new(FinalityDb::open(&db).unwrap());
    let registry = Arc::new(MasternodeRegistry::open(db).unwrap());
    let slashing = Arc::new(SlashingRecorder::new());
    let aggregator = FinalityAggregator::new(finality_db, registry.clone(), slashing, 1);

    let kp = timed::crypto::OperatorKeypair::generate();
    register(&registry, [1u8; 32], &kp);
    let quorum = Quorum { cycle: 0, members: vec![kp.public_key()] };

    let height = 20u64;
    let block_hash_a = [1u8; 32];
    let sig_a = FinalitySignature {
        block_hash: block_hash_a,
        height,
        signer_mn_id: [1u8; 32],
        signature_bytes: kp.sign_finality_message(&block_hash_a),
    };
    aggregator.accept_signature(&sig_a, [0u8; 32], &quorum, 1000).unwrap();

    // Same masternode, same height, a different block hash: equivocation.
    let block_hash_b = [2u8; 32];
    let sig_b = FinalitySignature {
        block_hash: block_hash_b,
        height,
        signer_mn_id: [1u8; 32],
        signature_bytes: kp.sign_finality_message(&block_hash_b),
    };
    let err = aggregator.accept_signature(&sig_b, [0u8; 32], &quorum, 1001).unwrap_err();
    assert!(matches!(err, AggregatorError::DoubleSign));
    assert_eq!(err.reject_kind(), RejectKind::Signature);
}

#[test]
fn settlement_canonical_order_and_conservation_violations_map_to_expected_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let settlement_store = Arc::new(SettlementStore::open(&db).unwrap());
    let htlc_store = Arc::new(HtlcStore::open(&db).unwrap());
    let engine = SettlementEngine::new(settlement_store, htlc_store, 1000, None);

    // LOCK with a single output: violates the two-output canonical layout.
    let malformed_lock = Transaction {
        version: 1,
        inputs: vec![],
        outputs: vec![TxOutput { value: 100, script_pubkey: vec![0x51] }],
        lock_time: 0,
        timestamp: 0,
        special: Some((SpecialTxType::Lock as u8, vec![])),
    };
    let mut overlay = SettlementOverlay::new();
    let mut htlc_overlay = HtlcOverlay::new();
    let err = engine
        .process_block(&[malformed_lock], 1, &mut overlay, &mut htlc_overlay)
        .unwrap_err();
    assert_eq!(err.reject_kind(), RejectKind::Policy);

    // LOCK whose vault and receipt amounts disagree: conservation violation.
    let mismatched_lock = Transaction {
        version: 1,
        inputs: vec![],
        outputs: vec![
            TxOutput { value: 100, script_pubkey: vec![0x51] },
            TxOutput { value: 99, script_pubkey: vec![] },
        ],
        lock_time: 0,
        timestamp: 0,
        special: Some((SpecialTxType::Lock as u8, vec![])),
    };
    let mut overlay = SettlementOverlay::new();
    let mut htlc_overlay = HtlcOverlay::new();
    let err = engine
        .process_block(&[mismatched_lock], 1, &mut overlay, &mut htlc_overlay)
        .unwrap_err();
    assert_eq!(err.reject_kind(), RejectKind::Conservation);
}
