//! S6 — a three-masternode quorum (size 3, threshold 2) reaches finality on
//! a block once two distinct members sign it, and a same-height rival block
//! is then refused by the enforcer even though it never collects signatures
//! of its own.

use std::sync::Arc;
use timed::crypto::OperatorKeypair;
use timed::finality::aggregator::FinalityAggregator;
use timed::finality::enforcement::FinalityEnforcer;
use timed::masternode_registry::{MasternodeRegistry, RegisterPayload};
use timed::quorum::Quorum;
use timed::slashing::SlashingRecorder;
use timed::storage::FinalityDb;
use timed::types::{FinalitySignature, OutPoint, SpecialTxType, Transaction};

fn register(registry: &MasternodeRegistry, mn_id: [u8; 32], kp: &OperatorKeypair) {
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
fn quorum_of_three_finalizes_block_on_second_distinct_signature() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let finality_db = Arc::new(FinalityDb::open(&db).unwrap());
    let registry = Arc::new(MasternodeRegistry::open(db).unwrap());
    let slashing = Arc::new(SlashingRecorder::new());
    let quorum_size = 3;
    let quorum_threshold = 2;
    let aggregator = FinalityAggregator::new(finality_db, registry.clone(), slashing, quorum_threshold);
    let enforcer = FinalityEnforcer::new();

    let kp_a = OperatorKeypair::generate(); // block producer, excluded from its own quorum
    let kp_b = OperatorKeypair::generate();
    let kp_c = OperatorKeypair::generate();
    register(&registry, [1u8; 32], &kp_a);
    register(&registry, [2u8; 32], &kp_b);
    register(&registry, [3u8; 32], &kp_c);

    let quorum = Quorum {
        cycle: 0,
        members: vec![kp_b.public_key(), kp_c.public_key()],
    };
    assert_eq!(quorum.members.len(), quorum_size - 1, "producer's own operator is excluded");

    let height = 100u64;
    let block_b = [0xAAu8; 32];

    let sig_b = FinalitySignature {
        block_hash: block_b,
        height,
        signer_mn_id: [2u8; 32],
        signature_bytes: kp_b.sign_finality_message(&block_b),
    };
    let outcome = aggregator.accept_signature(&sig_b, [2u8; 32], &quorum, 100).unwrap();
    assert!(!outcome.threshold_reached, "one of two required signatures is not enough");
    assert!(enforcer.check_new_block(height, &block_b).is_ok());

    let sig_c = FinalitySignature {
        block_hash: block_b,
        height,
        signer_mn_id: [3u8; 32],
        signature_bytes: kp_c.sign_finality_message(&block_b),
    };
    let outcome = aggregator.accept_signature(&sig_c, [3u8; 32], &quorum, 101).unwrap();
    assert!(outcome.threshold_reached);
    assert_eq!(outcome.signature_count, 2);
    enforcer.mark_final(height, block_b);

    // A rival block at the same height can never collect enough signatures
    // to overtake B — it's refused outright once B is final.
    let block_b_prime = [0xBBu8; 32];
    let err = enforcer.check_new_block(height, &block_b_prime).unwrap_err();
    assert!(matches!(err, timed::finality::enforcement::EnforcementError::ConflictsWithFinal { .. }));
}
