//! Boundary behaviors named in the testable-properties list: fallback slot
//! clamping, the bootstrap exemption from confirmation requirements, double
//! production guarding, and the finality-signature rate limit edge.

use std::sync::Arc;
use timed::constants::finality::{RATE_LIMIT_MAX_PER_WINDOW, RATE_LIMIT_WINDOW_SECS};
use timed::constants::REGTEST_PARAMS;
use timed::crypto::OperatorKeypair;
use timed::finality::aggregator::{AggregatorError, FinalityAggregator};
use timed::masternode_registry::{MasternodeRegistry, RegisterPayload};
use timed::quorum::Quorum;
use timed::scheduler::{self, ProductionGuard, SchedulerError};
use timed::slashing::SlashingRecorder;
use timed::storage::FinalityDb;
use timed::types::{FinalitySignature, OutPoint, SpecialTxType, Transaction};

fn fresh_registry() -> (tempfile::TempDir, MasternodeRegistry) {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    (dir, MasternodeRegistry::open(db).unwrap())
}

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
fn fallback_slot_clamps_at_360() {
    let params = REGTEST_PARAMS;
    let prev_time = 0i64;
    // Pick `now` far enough out that the raw slot would be in the thousands.
    let now = prev_time + params.target_spacing + params.leader_timeout + params.fallback_window * 10_000;
    let (slot, _aligned) = scheduler::compute_slot(prev_time, now, &params).unwrap();
    assert_eq!(slot, 360, "fallback slot must clamp at 360 regardless of how late `now` is");
}

#[test]
fn compute_slot_rejects_timestamps_before_minimum() {
    let params = REGTEST_PARAMS;
    let prev_time = 1_000i64;
    let err = scheduler::compute_slot(prev_time, prev_time, &params).unwrap_err();
    assert_eq!(err, SchedulerError::TooEarly);
}

#[test]
fn bootstrap_heights_admit_unconfirmed_masternodes() {
    // Heights at or below bootstrap_height are exempt from the confirmation
    // check that `eligible_candidates` otherwise enforces.
    let params = REGTEST_PARAMS;
    let (_dir, registry) = fresh_registry();
    let kp = OperatorKeypair::generate();
    register(&registry, [1u8; 32], &kp);
    // Never confirmed: confirmation_height stays None.

    let bootstrap_candidates = scheduler::eligible_candidates(&registry, params.bootstrap_height, &params);
    assert_eq!(bootstrap_candidates, vec![[1u8; 32]]);

    let post_bootstrap_candidates =
        scheduler::eligible_candidates(&registry, params.bootstrap_height + 1, &params);
    assert!(
        post_bootstrap_candidates.is_empty(),
        "an unconfirmed masternode must not be eligible past the bootstrap window"
    );
}

#[test]
fn production_guard_rejects_replaying_the_same_height() {
    let guard = ProductionGuard::new();
    guard.try_claim(5).unwrap();
    let err = guard.try_claim(5).unwrap_err();
    assert_eq!(err, SchedulerError::AlreadyProduced);
    // A later height is still claimable.
    guard.try_claim(6).unwrap();
}

fn fresh_aggregator() -> (tempfile::TempDir, FinalityAggregator, Arc<MasternodeRegistry>) {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let finality_db = Arc::new(FinalityDb::open(&db).unwrap());
    let registry = Arc::new(MasternodeRegistry::open(db).unwrap());
    let slashing = Arc::new(SlashingRecorder::new());
    let aggregator = FinalityAggregator::new(finality_db, registry.clone(), slashing, 1);
    (dir, aggregator, registry)
}

#[test]
fn signature_rate_limit_drops_the_first_over_limit_signature_then_resets() {
    let (_dir, aggregator, registry) = fresh_aggregator();
    let kp = OperatorKeypair::generate();
    register(&registry, [1u8; 32], &kp);
    let quorum = Quorum {
        cycle: 0,
        members: vec![kp.public_key()],
    };
    let peer = [42u8; 32];
    let window_start = 10_000i64;

    // Each call targets a distinct block hash so `Duplicate` never masks the
    // rate-limit check itself.
    for i in 0..RATE_LIMIT_MAX_PER_WINDOW {
        let mut block_hash = [0u8; 32];
        block_hash[0..4].copy_from_slice(&i.to_le_bytes());
        let sig = FinalitySignature {
            block_hash,
            height: 10,
            signer_mn_id: [1u8; 32],
            signature_bytes: kp.sign_finality_message(&block_hash),
        };
        aggregator
            .accept_signature(&sig, peer, &quorum, window_start)
            .unwrap();
    }

    // The 101st signature within the same window is rejected.
    let mut over_limit_hash = [0u8; 32];
    over_limit_hash[0] = 0xFF;
    let over_limit_sig = FinalitySignature {
        block_hash: over_limit_hash,
        height: 10,
        signer_mn_id: [1u8; 32],
        signature_bytes: kp.sign_finality_message(&over_limit_hash),
    };
    let err = aggregator
        .accept_signature(&over_limit_sig, peer, &quorum, window_start)
        .unwrap_err();
    assert!(matches!(err, AggregatorError::RateLimited));

    // Once the window has fully rolled over, the same peer is accepted again.
    let after_window = window_start + RATE_LIMIT_WINDOW_SECS as i64 + 1;
    aggregator
        .accept_signature(&over_limit_sig, peer, &quorum, after_window)
        .unwrap();
}
