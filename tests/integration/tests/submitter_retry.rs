//! Integration test: retry schedule, network remediation and cancellation
//! through the full engine.

use blocktrust_anchor::adapters::ScriptedFault;
use blocktrust_anchor::{AttemptOutcome, RegistryError, RejectionReason};
use blocktrust_core::{ErrorCode, HashAlgorithm};
use blocktrust_crypto::{compute_digest, operation_id};
use blocktrust_integration_tests::{Harness, HOLDER_A, PRIMARY};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let h = Harness::new();
    let (owner, credential) = h.onboard("alice", HOLDER_A);
    h.registry.push_transient("nonce too low");
    h.registry.push_transient("request timed out");

    let digest = compute_digest(b"retry me", HashAlgorithm::ContentHash);
    let started = tokio::time::Instant::now();
    let view = h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(6000));

    let entries = h
        .engine
        .submitter()
        .ledger()
        .entries(&operation_id(&digest, &credential.credential_ref()));
    assert_eq!(entries.len(), 3);
    let delays: Vec<u64> = entries.iter().map(|e| e.delay_before_attempt_ms).collect();
    assert_eq!(delays, vec![0, 2000, 4000]);
    assert!(matches!(entries[0].outcome, AttemptOutcome::TransientFailure { .. }));
    assert!(matches!(
        &entries[2].outcome,
        AttemptOutcome::Anchored { tx_ref } if *tx_ref == view.chain_tx_ref
    ));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let h = Harness::new();
    let (owner, _) = h.onboard("bob", HOLDER_A);
    for _ in 0..3 {
        h.registry.push_transient("gateway timeout");
    }

    let digest = compute_digest(b"never lands", HashAlgorithm::ContentHash);
    let err = h.engine.attest(&owner, PRIMARY, digest).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SubmissionFailed);
    assert_eq!(h.registry.anchor_calls(), 3);
    assert_eq!(h.engine.submitter().store().genuine_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_definitive_rejection_is_not_retried() {
    let h = Harness::new();
    let (owner, _) = h.onboard("carol", HOLDER_A);
    h.registry
        .push_fault(ScriptedFault::Fail(RegistryError::Definitive(RejectionReason::InsufficientFunds)));

    let digest = compute_digest(b"no gas", HashAlgorithm::ContentHash);
    let err = h.engine.attest(&owner, PRIMARY, digest).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SubmissionRejected);
    assert_eq!(h.registry.anchor_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_receipt_is_adopted_not_resent() {
    let h = Harness::new();
    let (owner, _) = h.onboard("dave", HOLDER_A);
    h.registry
        .push_fault(ScriptedFault::MineThenFail("receipt polling timed out".into()));

    let digest = compute_digest(b"mined once", HashAlgorithm::ContentHash);
    h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    assert_eq!(h.registry.anchor_calls(), 1);
    assert_eq!(h.registry.record_count(), 1);
}

#[tokio::test]
async fn test_signer_on_known_other_chain_is_switched() {
    let h = Harness::with_signer_on(Harness::config(), 1);
    h.context.register_known(137);
    let (owner, _) = h.onboard("erin", HOLDER_A);

    let digest = compute_digest(b"switch first", HashAlgorithm::ContentHash);
    h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    assert_eq!(h.context.current(), 137);
    assert!(h.context.added_chains().is_empty());
}

#[tokio::test]
async fn test_unrecognized_chain_is_registered_then_switched() {
    let h = Harness::with_signer_on(Harness::config(), 1);
    let (owner, _) = h.onboard("frank", HOLDER_A);

    let digest = compute_digest(b"register first", HashAlgorithm::ContentHash);
    h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    assert_eq!(h.context.current(), 137);
    let added = h.context.added_chains();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].chain_id_hex(), "0x89");
}

#[tokio::test]
async fn test_declined_switch_is_wrong_network() {
    let h = Harness::with_signer_on(Harness::config(), 1);
    h.context.register_known(137);
    h.context.set_reject_switch(true);
    let (owner, _) = h.onboard("grace", HOLDER_A);

    let digest = compute_digest(b"stay put", HashAlgorithm::ContentHash);
    let err = h.engine.attest(&owner, PRIMARY, digest).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WrongNetwork);
    assert_eq!(h.registry.anchor_calls(), 0);
}

#[tokio::test]
async fn test_chain_without_params_is_unsupported() {
    let mut config = Harness::config();
    config.chain.chain_id = 424242;
    let h = Harness::with_signer_on(config, 1);
    let (owner, _) = h.onboard("heidi", HOLDER_A);

    let digest = compute_digest(b"exotic chain", HashAlgorithm::ContentHash);
    let err = h.engine.attest(&owner, PRIMARY, digest).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedContext);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retries() {
    let h = Harness::new();
    let (owner, _) = h.onboard("ivan", HOLDER_A);
    h.registry.push_transient("timeout");
    h.registry.push_transient("timeout");

    let digest = compute_digest(b"abandoned", HashAlgorithm::ContentHash);
    let attest = h.engine.attest(&owner, PRIMARY, digest);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.engine.shutdown();
    };
    let (result, ()) = tokio::join!(attest, cancel);
    let err = result.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
    assert_eq!(h.registry.anchor_calls(), 1);
}
