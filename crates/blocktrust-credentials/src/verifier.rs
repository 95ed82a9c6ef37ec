use blocktrust_anchor::{AnchorError, AnchorRecord, AnchorRegistry};
use blocktrust_core::{
    ChainTxRef, CoreError, CredentialRef, Digest, HashAlgorithm, KeyRef, SignatureHex,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CredentialError;
use crate::keyring::Keyring;
use crate::registry::CredentialRegistry;

/// Raw verification input as received from a caller.
///
/// Every field is optional here so that absence is reported as a malformed
/// attestation instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub digest: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    pub keyring_signature: Option<String>,
    pub keyring_key_ref: Option<String>,
    pub chain_tx_ref: Option<String>,
}

/// An individual verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

impl VerificationCheck {
    fn pass(name: &str) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: None,
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub keyring_valid: bool,
    pub chain_valid: bool,
    pub credential_active_at_signing_time: bool,
    /// Credential version pinned by the on-chain anchor, when it resolved.
    pub credential_ref: Option<CredentialRef>,
    /// On-chain anchoring time, used as the signing time.
    pub signed_at: Option<DateTime<Utc>>,
    pub checks: Vec<VerificationCheck>,
}

struct ParsedRequest {
    digest: Digest,
    signature: SignatureHex,
    key_ref: KeyRef,
    tx_ref: ChainTxRef,
}

impl VerificationRequest {
    fn parse(&self) -> Result<ParsedRequest, CoreError> {
        let algorithm = match self.algorithm.as_deref() {
            Some(raw) => raw
                .parse::<HashAlgorithm>()
                .map_err(|_| malformed(format!("unknown algorithm '{raw}'")))?,
            None => HashAlgorithm::default(),
        };
        let digest = Digest::normalize(required(&self.digest, "digest")?, algorithm)
            .map_err(|e| malformed(e.to_string()))?;
        let signature = SignatureHex::parse(required(&self.keyring_signature, "keyring_signature")?)
            .map_err(|e| malformed(e.to_string()))?;
        let key_ref = KeyRef::parse(required(&self.keyring_key_ref, "keyring_key_ref")?)
            .map_err(|e| malformed(e.to_string()))?;
        let tx_ref = ChainTxRef::parse(required(&self.chain_tx_ref, "chain_tx_ref")?)
            .map_err(|e| malformed(e.to_string()))?;
        Ok(ParsedRequest {
            digest,
            signature,
            key_ref,
            tx_ref,
        })
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, CoreError> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(malformed(format!("missing field '{name}'"))),
    }
}

fn malformed(msg: impl Into<String>) -> CoreError {
    CoreError::MalformedAttestation(msg.into())
}

/// Checks both halves of an attestation and the credential behind it.
///
/// Read-only: nothing here changes credential or attestation state.
pub struct DualSignatureVerifier {
    keyring: Arc<Keyring>,
    registry: Arc<dyn AnchorRegistry>,
    credentials: Arc<CredentialRegistry>,
}

impl DualSignatureVerifier {
    pub fn new(
        keyring: Arc<Keyring>,
        registry: Arc<dyn AnchorRegistry>,
        credentials: Arc<CredentialRegistry>,
    ) -> Self {
        Self {
            keyring,
            registry,
            credentials,
        }
    }

    pub async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationReport, CredentialError> {
        let parsed = request.parse()?;

        let record = self
            .registry
            .resolve(&parsed.tx_ref)
            .await
            .map_err(|e| AnchorError::RegistryUnavailable(e.to_string()))?;
        let (chain_check, credential_ref, signed_at) = self.check_chain(&parsed, record.as_ref());
        let keyring_check = self.check_keyring(&parsed, credential_ref.as_ref());

        let credential_check = match (&credential_ref, signed_at) {
            (Some(cref), Some(at)) if self.credentials.was_active_at(cref, at) => {
                VerificationCheck::pass("credential_at_signing_time")
            }
            (Some(cref), Some(at)) => VerificationCheck::fail(
                "credential_at_signing_time",
                format!("{cref} was not active at {}", at.to_rfc3339()),
            ),
            _ => VerificationCheck::fail(
                "credential_at_signing_time",
                "no anchored credential to check",
            ),
        };

        let keyring_valid = keyring_check.passed;
        let chain_valid = chain_check.passed;
        let credential_active_at_signing_time = credential_check.passed;
        let checks = vec![keyring_check, chain_check, credential_check];

        let valid = keyring_valid && chain_valid && credential_active_at_signing_time;
        tracing::info!(
            tx_ref = %parsed.tx_ref,
            valid,
            keyring_valid,
            chain_valid,
            credential_active_at_signing_time,
            "attestation verified"
        );

        Ok(VerificationReport {
            valid,
            keyring_valid,
            chain_valid,
            credential_active_at_signing_time,
            credential_ref,
            signed_at,
            checks,
        })
    }

    /// The signature must verify, and when the anchor names a credential the
    /// key must belong to that credential's owner.
    fn check_keyring(
        &self,
        parsed: &ParsedRequest,
        credential_ref: Option<&CredentialRef>,
    ) -> VerificationCheck {
        match self
            .keyring
            .verify(&parsed.digest, &parsed.signature, &parsed.key_ref)
        {
            Ok(()) => {}
            Err(CredentialError::KeyNotFound(_)) => {
                return VerificationCheck::fail("keyring_signature", "unknown keyring key")
            }
            Err(_) => {
                return VerificationCheck::fail("keyring_signature", "signature does not verify")
            }
        }
        match (credential_ref, self.keyring.owner_of(&parsed.key_ref)) {
            (Some(cref), Some(owner)) if cref.owner_id != owner => VerificationCheck::fail(
                "keyring_signature",
                "keyring key does not belong to the credential owner",
            ),
            _ => VerificationCheck::pass("keyring_signature"),
        }
    }

    fn check_chain(
        &self,
        parsed: &ParsedRequest,
        record: Option<&AnchorRecord>,
    ) -> (VerificationCheck, Option<CredentialRef>, Option<DateTime<Utc>>) {
        let Some(record) = record else {
            return (
                VerificationCheck::fail("chain_anchor", "transaction not found"),
                None,
                None,
            );
        };
        if record.digest != *parsed.digest.as_bytes() {
            return (
                VerificationCheck::fail("chain_anchor", "anchored digest differs"),
                None,
                None,
            );
        }
        let Some(credential) = self
            .credentials
            .find_by_commitment(&record.credential_commitment)
        else {
            return (
                VerificationCheck::fail("chain_anchor", "anchor names an unknown credential"),
                None,
                None,
            );
        };
        let cref = credential.credential_ref();
        if record.signer != credential.holder_address {
            return (
                VerificationCheck::fail(
                    "chain_anchor",
                    format!("signer {} is not the holder of {cref}", record.signer),
                ),
                Some(cref),
                Some(record.anchored_at),
            );
        }
        (
            VerificationCheck::pass("chain_anchor"),
            Some(cref),
            Some(record.anchored_at),
        )
    }
}
