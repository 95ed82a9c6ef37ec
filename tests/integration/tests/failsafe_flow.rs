//! Integration test: duress failsafe, decoy indistinguishability and recovery.

use blocktrust_core::{
    Authenticity, CredentialStatus, EngineEvent, ErrorCode, HashAlgorithm, InvalidationCause,
};
use blocktrust_credentials::{InvalidationOutcome, VerificationRequest};
use blocktrust_crypto::compute_digest;
use blocktrust_integration_tests::{Harness, DURESS, HOLDER_A, HOLDER_B, PRIMARY};

fn field_names(value: &serde_json::Value) -> Vec<String> {
    let mut keys: Vec<String> = value
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    keys.sort();
    keys
}

#[tokio::test]
async fn test_duress_attest_returns_indistinguishable_decoy() {
    let h = Harness::new();
    let (owner, _) = h.onboard("alice", HOLDER_A);

    let genuine = h
        .engine
        .attest(&owner, PRIMARY, compute_digest(b"real", HashAlgorithm::ContentHash))
        .await
        .unwrap();
    let decoy = h
        .engine
        .attest(&owner, DURESS, compute_digest(b"coerced", HashAlgorithm::ContentHash))
        .await
        .unwrap();

    let genuine_json = serde_json::to_value(&genuine).unwrap();
    let decoy_json = serde_json::to_value(&decoy).unwrap();
    assert_eq!(field_names(&genuine_json), field_names(&decoy_json));
    for key in field_names(&genuine_json) {
        let same_kind = std::mem::discriminant(&genuine_json[&key]) == std::mem::discriminant(&decoy_json[&key]);
        assert!(same_kind, "field {key} differs in type");
    }
    assert_eq!(
        genuine_json["chain_tx_ref"].as_str().unwrap().len(),
        decoy_json["chain_tx_ref"].as_str().unwrap().len()
    );

    // Only the trusted side can tell them apart.
    let store = h.engine.submitter().store();
    assert_eq!(store.get(&genuine.id).unwrap().authenticity, Authenticity::Genuine);
    assert_eq!(store.get(&decoy.id).unwrap().authenticity, Authenticity::Decoy);
    assert_eq!(h.engine.attestation_by_tx(decoy.chain_tx_ref.as_str()).unwrap(), decoy);

    let current = h.engine.credential_history(&owner).unwrap().current.unwrap();
    assert_eq!(current.status, CredentialStatus::Invalidated);
    assert_eq!(current.invalidation_cause, Some(InvalidationCause::Failsafe));
}

#[tokio::test]
async fn test_decoy_never_verifies() {
    let h = Harness::new();
    let (owner, _) = h.onboard("bob", HOLDER_A);
    let decoy = h
        .engine
        .attest(&owner, DURESS, compute_digest(b"coerced", HashAlgorithm::ContentHash))
        .await
        .unwrap();

    let report = h
        .engine
        .verify(&VerificationRequest {
            digest: Some(decoy.digest.to_hex()),
            algorithm: None,
            keyring_signature: Some(decoy.keyring_signature.as_str().to_string()),
            keyring_key_ref: Some(decoy.keyring_key_ref.to_string()),
            chain_tx_ref: Some(decoy.chain_tx_ref.to_string()),
        })
        .await
        .unwrap();
    assert!(!report.valid);
    assert!(!report.chain_valid);
}

#[tokio::test]
async fn test_trigger_reports_both_steps_and_emits_event() {
    let h = Harness::new();
    let (owner, credential) = h.onboard("carol", HOLDER_A);
    let mut events = h.engine.events().subscribe().unwrap();

    let outcome = h
        .engine
        .trigger_failsafe(&owner, DURESS, compute_digest(b"x", HashAlgorithm::ContentHash))
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(
        outcome.invalidation,
        InvalidationOutcome::Invalidated {
            credential_ref: credential.credential_ref()
        }
    );

    let mut triggered = false;
    let mut invalidated = false;
    while let Some(event) = events.try_recv() {
        match event {
            EngineEvent::FailsafeTriggered { invalidated: true, .. } => triggered = true,
            EngineEvent::CredentialInvalidated { cause, .. } => {
                assert_eq!(cause, InvalidationCause::Failsafe);
                invalidated = true;
            }
            _ => {}
        }
    }
    assert!(triggered && invalidated);

    let status = h.engine.failsafe_status(&owner);
    assert!(status.configured);
    assert!(status.last_trigger.is_some());

    // A second trigger finds nothing left to invalidate.
    let again = h
        .engine
        .trigger_failsafe(&owner, DURESS, compute_digest(b"y", HashAlgorithm::ContentHash))
        .unwrap();
    assert!(matches!(again.invalidation, InvalidationOutcome::AlreadyInvalidated { .. }));
}

#[tokio::test]
async fn test_primary_secret_cannot_trigger() {
    let h = Harness::new();
    let (owner, _) = h.onboard("dave", HOLDER_A);
    let err = h
        .engine
        .trigger_failsafe(&owner, PRIMARY, compute_digest(b"x", HashAlgorithm::ContentHash))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert!(h.engine.failsafe_status(&owner).last_trigger.is_none());
}

#[tokio::test]
async fn test_secret_policy() {
    let h = Harness::new();
    let owner = blocktrust_core::OwnerId::new("erin").unwrap();
    let err = h.engine.configure_failsafe(&owner, "primary-secret", "short").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSecret);
    let err = h
        .engine
        .configure_failsafe(&owner, "identical-secret", "identical-secret")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidSecret);
    assert!(!h.engine.failsafe_status(&owner).configured);
}

#[tokio::test]
async fn test_recovery_after_failsafe() {
    let h = Harness::new();
    let (owner, _) = h.onboard("frank", HOLDER_A);

    let before = h
        .engine
        .attest(&owner, PRIMARY, compute_digest(b"before", HashAlgorithm::ContentHash))
        .await
        .unwrap();
    h.engine
        .attest(&owner, DURESS, compute_digest(b"coerced", HashAlgorithm::ContentHash))
        .await
        .unwrap();

    // Fresh identity verification mints the next version.
    let renewed = h.verify_identity(&owner, HOLDER_B);
    assert_eq!(renewed.version, 2);
    assert_eq!(renewed.status, CredentialStatus::Active);

    let history = h.engine.credential_history(&owner).unwrap();
    assert_eq!(history.history.len(), 2);
    assert_eq!(history.history[0].status, CredentialStatus::Invalidated);

    let after = h
        .engine
        .attest(&owner, PRIMARY, compute_digest(b"after", HashAlgorithm::ContentHash))
        .await
        .unwrap();
    assert_eq!(after.credential_ref.version, 2);

    // The pre-duress attestation still verifies against version 1.
    let report = h
        .engine
        .verify(&VerificationRequest {
            digest: Some(before.digest.to_hex()),
            algorithm: None,
            keyring_signature: Some(before.keyring_signature.as_str().to_string()),
            keyring_key_ref: Some(before.keyring_key_ref.to_string()),
            chain_tx_ref: Some(before.chain_tx_ref.to_string()),
        })
        .await
        .unwrap();
    assert!(report.valid);
    assert_eq!(report.credential_ref.unwrap().version, 1);
}
