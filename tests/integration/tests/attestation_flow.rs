//! Integration test: hash, attest and verify across every crate.

use blocktrust_core::{AttestationView, ErrorCode, HashAlgorithm, InvalidationCause};
use blocktrust_credentials::VerificationRequest;
use blocktrust_crypto::{compute_digest, DigestExt};
use blocktrust_integration_tests::{Harness, HOLDER_A, PRIMARY};

fn request_for(view: &AttestationView) -> VerificationRequest {
    VerificationRequest {
        digest: Some(view.digest.to_hex()),
        algorithm: Some(view.digest.algorithm().as_str().to_string()),
        keyring_signature: Some(view.keyring_signature.as_str().to_string()),
        keyring_key_ref: Some(view.keyring_key_ref.to_string()),
        chain_tx_ref: Some(view.chain_tx_ref.to_string()),
    }
}

#[tokio::test]
async fn test_document_attest_and_verify() {
    let h = Harness::new();
    let (owner, credential) = h.onboard("alice", HOLDER_A);
    let document = b"Deed of sale, lot 42";
    let digest = compute_digest(document, HashAlgorithm::ContentHash);

    let view = h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    assert_eq!(view.credential_ref, credential.credential_ref());
    assert!(view.digest.matches_content(document));

    let report = h.engine.verify(&request_for(&view)).await.unwrap();
    assert!(report.valid, "checks: {:?}", report.checks);
    assert!(report.keyring_valid && report.chain_valid);
    assert!(report.credential_active_at_signing_time);
    assert_eq!(report.signed_at, Some(view.created_at));
}

#[tokio::test]
async fn test_chain_native_hash_flow() {
    let h = Harness::new();
    let (owner, _) = h.onboard("bob", HOLDER_A);
    let digest = compute_digest(b"bill of lading", HashAlgorithm::ChainNativeHash);

    let view = h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    assert_eq!(view.digest.algorithm(), HashAlgorithm::ChainNativeHash);
    assert!(h.engine.verify(&request_for(&view)).await.unwrap().valid);
}

#[tokio::test]
async fn test_same_digest_twice_stores_one_attestation() {
    let h = Harness::new();
    let (owner, _) = h.onboard("carol", HOLDER_A);
    let digest = compute_digest(b"invoice 2024-001", HashAlgorithm::ContentHash);

    let first = h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    let second = h.engine.attest(&owner, PRIMARY, digest).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.registry.anchor_calls(), 1);
    assert_eq!(h.engine.submitter().store().genuine_count(), 1);
}

#[tokio::test]
async fn test_normalized_input_forms_hit_same_attestation() {
    let h = Harness::new();
    let (owner, _) = h.onboard("dave", HOLDER_A);
    let raw = "A94A8FE5CCB19BA61C4C0873D391E987982FBBD3E4F4B8B5D0A8E1B2C3D4E5F6";

    let upper = h.engine.normalize(raw, None).unwrap();
    let prefixed = h
        .engine
        .normalize(&format!("0x{}", raw.to_lowercase()), Some("sha256"))
        .unwrap();
    assert_eq!(upper, prefixed);
    assert_eq!(
        upper.to_hex(),
        "0xa94a8fe5ccb19ba61c4c0873d391e987982fbbd3e4f4b8b5d0a8e1b2c3d4e5f6"
    );

    let a = h.engine.attest(&owner, PRIMARY, upper).await.unwrap();
    let b = h.engine.attest(&owner, PRIMARY, prefixed).await.unwrap();
    assert_eq!(a.id, b.id);

    let err = h.engine.normalize(&raw[..63], None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidDigest);
    assert!(err.to_string().contains("64 characters"));
}

#[tokio::test]
async fn test_revoked_after_signing_still_verifies() {
    let h = Harness::new();
    let (owner, credential) = h.onboard("erin", HOLDER_A);
    let digest = compute_digest(b"lease", HashAlgorithm::ContentHash);
    let view = h.engine.attest(&owner, PRIMARY, digest).await.unwrap();

    let revoked = h.engine.revoke(&owner, credential.version).unwrap();
    assert_eq!(revoked.invalidation_cause, Some(InvalidationCause::User));

    let report = h.engine.verify(&request_for(&view)).await.unwrap();
    assert!(report.credential_active_at_signing_time);
    assert!(report.valid);

    // Signing is refused from now on.
    let later = compute_digest(b"second lease", HashAlgorithm::ContentHash);
    let err = h.engine.attest(&owner, PRIMARY, later).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CredentialInvalidated);
}

#[tokio::test]
async fn test_tampered_fields_fail_verification() {
    let h = Harness::new();
    let (owner, _) = h.onboard("frank", HOLDER_A);
    let digest = compute_digest(b"contract v1", HashAlgorithm::ContentHash);
    let view = h.engine.attest(&owner, PRIMARY, digest).await.unwrap();

    let mut forged = request_for(&view);
    forged.digest = Some(compute_digest(b"contract v2", HashAlgorithm::ContentHash).to_hex());
    let report = h.engine.verify(&forged).await.unwrap();
    assert!(!report.valid);
    assert!(!report.keyring_valid);
    assert!(!report.chain_valid);

    let mut truncated = request_for(&view);
    truncated.keyring_signature = Some("abcd".into());
    let err = h.engine.verify(&truncated).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedAttestation);
}

#[tokio::test]
async fn test_unknown_owner_cannot_attest() {
    let h = Harness::new();
    let owner = blocktrust_core::OwnerId::new("ghost").unwrap();
    let digest = compute_digest(b"x", HashAlgorithm::ContentHash);
    let err = h.engine.attest(&owner, PRIMARY, digest).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(h.registry.anchor_calls(), 0);
}
