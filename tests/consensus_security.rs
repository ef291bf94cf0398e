//! S5 — primary/fallback production ordering, and rejection of a producer
//! the slot formula did not select.

use timed::block::types::{Block, BlockHeader};
use timed::block::validator::{verify_block, ValidationError};
use timed::constants::REGTEST_PARAMS;
use timed::crypto::OperatorKeypair;
use timed::masternode_registry::{MasternodeRegistry, RegisterPayload};
use timed::scheduler::compute_slot;
use timed::types::{OutPoint, SpecialTxType, Transaction};

const HEIGHT: u64 = 6; // past REGTEST_PARAMS.bootstrap_height (5)

fn fresh_registry() -> (tempfile::TempDir, MasternodeRegistry) {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    (dir, MasternodeRegistry::open(db).unwrap())
}

fn register_and_confirm(registry: &MasternodeRegistry, mn_id: [u8; 32], kp: &OperatorKeypair) {
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
    registry.confirm(&mn_id, HEIGHT - 1).unwrap();
}

fn sign_and_build(height: u64, timestamp: i64, producer_mn_id: [u8; 32], kp: &OperatorKeypair) -> Block {
    let mut block = Block {
        header: BlockHeader {
            version: 1,
            height,
            previous_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            timestamp,
            producer_mn_id,
        },
        transactions: vec![],
        signature: Vec::new(),
    };
    block.recompute_merkle_root();
    let hash = block.hash();
    block.signature = kp.sign_block_hash(&hash);
    block
}

#[test]
fn fallback_producer_verifies_when_primary_is_late() {
    let params = REGTEST_PARAMS;
    let (_dir, registry) = fresh_registry();
    let kp_a = OperatorKeypair::generate();
    let kp_b = OperatorKeypair::generate();
    register_and_confirm(&registry, [1u8; 32], &kp_a);
    register_and_confirm(&registry, [2u8; 32], &kp_b);

    let prev_time = 0i64;
    // Past leader_timeout, well into fallback.
    let now = prev_time + params.target_spacing + params.leader_timeout + 1;
    let (slot, aligned) = compute_slot(prev_time, now, &params).unwrap();
    assert!(slot >= 1, "expected a fallback slot past leader_timeout");

    let candidates = timed::scheduler::sorted_candidates(&[0u8; 32], HEIGHT, vec![[1u8; 32], [2u8; 32]]);
    let expected = candidates[(slot as usize) % candidates.len()];
    let kp = if expected == [1u8; 32] { &kp_a } else { &kp_b };

    let block = sign_and_build(HEIGHT, aligned, expected, kp);
    let verified = verify_block(&block, prev_time, &[0u8; 32], &registry, &params, now + 1).unwrap();
    assert!(verified.skipped.len() <= 1);
}

#[test]
fn wrong_producer_for_the_slot_is_rejected() {
    let params = REGTEST_PARAMS;
    let (_dir, registry) = fresh_registry();
    let kp_a = OperatorKeypair::generate();
    let kp_b = OperatorKeypair::generate();
    let kp_c = OperatorKeypair::generate();
    register_and_confirm(&registry, [1u8; 32], &kp_a);
    register_and_confirm(&registry, [2u8; 32], &kp_b);
    register_and_confirm(&registry, [3u8; 32], &kp_c);

    let prev_time = 0i64;
    let now = prev_time + params.target_spacing + 1;
    let (_, aligned) = compute_slot(prev_time, now, &params).unwrap();

    let candidates = timed::scheduler::sorted_candidates(
        &[0u8; 32],
        HEIGHT,
        vec![[1u8; 32], [2u8; 32], [3u8; 32]],
    );
    let actual_slot0_producer = candidates[0];
    let impostor = if actual_slot0_producer == [3u8; 32] { [1u8; 32] } else { [3u8; 32] };
    let impostor_kp = if impostor == [1u8; 32] {
        &kp_a
    } else if impostor == [2u8; 32] {
        &kp_b
    } else {
        &kp_c
    };

    let block = sign_and_build(HEIGHT, aligned, impostor, impostor_kp);
    let result = verify_block(&block, prev_time, &[0u8; 32], &registry, &params, now + 1);
    assert!(matches!(result, Err(ValidationError::ProducerMismatch)));
}

#[test]
fn block_timestamp_too_far_in_future_is_rejected() {
    let params = REGTEST_PARAMS;
    let (_dir, registry) = fresh_registry();
    let kp = OperatorKeypair::generate();
    register_and_confirm(&registry, [1u8; 32], &kp);

    let prev_time = 0i64;
    let far_future = prev_time + params.target_spacing + 10_000;
    let block = sign_and_build(HEIGHT, far_future, [1u8; 32], &kp);
    let err = verify_block(&block, prev_time, &[0u8; 32], &registry, &params, prev_time).unwrap_err();
    assert!(matches!(err, ValidationError::TimestampTooFarInFuture { .. }));
}
