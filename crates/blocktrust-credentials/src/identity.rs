//! Intake for identity-verification results from the external provider.
//!
//! In `Live` mode every payload must carry an HMAC-SHA256 of the raw body,
//! keyed with the shared webhook secret, in `X-Payload-Digest` (hex, with an
//! optional `sha256=` prefix). `Mock` mode skips the check and is meant for
//! development only.

use blocktrust_core::{ChainAddress, Credential, IdentityConfig, IdentityMode, OwnerId};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

use crate::error::CredentialError;
use crate::registry::CredentialRegistry;

type HmacSha256 = Hmac<Sha256>;

pub const PAYLOAD_DIGEST_HEADER: &str = "x-payload-digest";

const REVIEWED_EVENT: &str = "applicantReviewed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewAnswer {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub review_answer: ReviewAnswer,
}

/// Provider webhook payload, in the provider's field naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityVerifiedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub applicant_id: Option<String>,
    /// Our owner id, passed to the provider when the applicant was created.
    pub external_user_id: OwnerId,
    pub holder_address: ChainAddress,
    pub review_result: ReviewResult,
}

impl IdentityVerifiedEvent {
    pub fn approved(owner: OwnerId, holder: ChainAddress) -> Self {
        Self {
            event_type: REVIEWED_EVENT.into(),
            applicant_id: None,
            external_user_id: owner,
            holder_address: holder,
            review_result: ReviewResult {
                review_answer: ReviewAnswer::Green,
            },
        }
    }

    pub fn is_approval(&self) -> bool {
        self.event_type == REVIEWED_EVENT && self.review_result.review_answer == ReviewAnswer::Green
    }
}

pub struct IdentityIntake {
    mode: IdentityMode,
    webhook_secret: Option<String>,
    registry: Arc<CredentialRegistry>,
}

impl IdentityIntake {
    pub fn new(config: &IdentityConfig, registry: Arc<CredentialRegistry>) -> Result<Self, CredentialError> {
        if config.mode == IdentityMode::Live && config.webhook_secret.as_deref().map_or(true, str::is_empty) {
            return Err(CredentialError::Configuration(
                "live identity mode requires a webhook secret".into(),
            ));
        }
        if config.mode == IdentityMode::Mock {
            tracing::warn!("identity intake running in mock mode, webhook signatures are not checked");
        }
        Ok(Self {
            mode: config.mode,
            webhook_secret: config.webhook_secret.clone(),
            registry,
        })
    }

    pub fn mode(&self) -> IdentityMode {
        self.mode
    }

    /// Authenticate and apply one webhook delivery.
    ///
    /// Returns the active credential for approvals and `None` for events that
    /// do not grant a credential.
    pub fn accept(
        &self,
        payload: &[u8],
        payload_digest: Option<&str>,
    ) -> Result<Option<Credential>, CredentialError> {
        if self.mode == IdentityMode::Live {
            let secret = self
                .webhook_secret
                .as_deref()
                .ok_or_else(|| CredentialError::Configuration("missing webhook secret".into()))?;
            let header = payload_digest
                .ok_or_else(|| CredentialError::Unauthorized("missing payload digest".into()))?;
            verify_payload_digest(secret, payload, header)?;
        }

        let event: IdentityVerifiedEvent = serde_json::from_slice(payload)
            .map_err(|e| CredentialError::InvalidEvent(e.to_string()))?;

        if !event.is_approval() {
            tracing::info!(
                owner = %event.external_user_id,
                event_type = %event.event_type,
                answer = ?event.review_result.review_answer,
                "identity event does not grant a credential"
            );
            return Ok(None);
        }

        let credential = self
            .registry
            .on_identity_verified(&event.external_user_id, event.holder_address)?;
        Ok(Some(credential))
    }
}

/// Hex HMAC-SHA256 of `payload`, as the provider computes it.
pub fn payload_digest(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_payload_digest(secret: &str, payload: &[u8], header: &str) -> Result<(), CredentialError> {
    let received = header.trim();
    let received = received.strip_prefix("sha256=").unwrap_or(received);
    let expected = hex::decode(received)
        .map_err(|_| CredentialError::Unauthorized("payload digest is not hex".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CredentialError::Configuration(e.to_string()))?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| CredentialError::Unauthorized("payload digest mismatch".into()))
}
