//! Duress failsafe.
//!
//! An owner registers a primary secret and a distinct duress secret. When the
//! duress secret is presented the protocol does two things, in this order:
//!
//! 1. stores a decoy attestation shaped exactly like a genuine one, so the
//!    coerced session looks normal;
//! 2. invalidates the owner's latest credential version with cause `failsafe`.
//!
//! The two steps cannot be made atomic. Each outcome is reported on its own,
//! a decoy is never rolled back, and a trigger is never reported as
//! successful unless the invalidation really happened.

use blocktrust_anchor::AttestationStore;
use blocktrust_core::{
    Attestation, Authenticity, ChainTxRef, CoreError, CredentialRef, Digest, EngineEvent,
    ErrorCode, EventBus, FailsafeConfig, InvalidationCause, KeyRef, OwnerId, SignatureHex,
};
use blocktrust_crypto::{hash_secret, verify_secret, SecretHash};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CredentialError;
use crate::keyring::Keyring;
use crate::registry::CredentialRegistry;

/// Which registered secret a presented secret matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretMatch {
    Primary,
    Duress,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecoyOutcome {
    Created { attestation: Attestation },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvalidationOutcome {
    Invalidated { credential_ref: CredentialRef },
    AlreadyInvalidated { credential_ref: CredentialRef },
    Failed { code: ErrorCode, message: String },
}

impl InvalidationOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailsafeOutcome {
    pub decoy: DecoyOutcome,
    pub invalidation: InvalidationOutcome,
}

impl FailsafeOutcome {
    /// Both steps took effect.
    pub fn is_complete(&self) -> bool {
        matches!(self.decoy, DecoyOutcome::Created { .. }) && self.invalidation.succeeded()
    }

    pub fn decoy_attestation(&self) -> Option<&Attestation> {
        match &self.decoy {
            DecoyOutcome::Created { attestation } => Some(attestation),
            DecoyOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailsafeStatus {
    pub configured: bool,
    pub last_trigger: Option<DateTime<Utc>>,
    /// Invalidation result of the last trigger; `failed` when it did not happen.
    pub last_invalidation: Option<InvalidationOutcome>,
}

struct FailsafeRecord {
    primary: SecretHash,
    duress: SecretHash,
    configured_at: DateTime<Utc>,
    last_trigger: Option<DateTime<Utc>>,
    last_invalidation: Option<InvalidationOutcome>,
}

pub struct FailsafeProtocol {
    records: DashMap<OwnerId, FailsafeRecord>,
    credentials: Arc<CredentialRegistry>,
    keyring: Arc<Keyring>,
    store: Arc<AttestationStore>,
    events: Arc<EventBus>,
    min_secret_len: usize,
}

impl FailsafeProtocol {
    pub fn new(
        config: &FailsafeConfig,
        credentials: Arc<CredentialRegistry>,
        keyring: Arc<Keyring>,
        store: Arc<AttestationStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            records: DashMap::new(),
            credentials,
            keyring,
            store,
            events,
            min_secret_len: config.min_secret_len,
        }
    }

    /// Register (or replace) the owner's primary and duress secrets.
    pub fn configure(&self, owner: &OwnerId, primary: &str, duress: &str) -> Result<(), CredentialError> {
        for (label, secret) in [("primary", primary), ("duress", duress)] {
            if secret.chars().count() < self.min_secret_len {
                return Err(CredentialError::InvalidSecret(format!(
                    "{label} secret must be at least {} characters",
                    self.min_secret_len
                )));
            }
        }
        if primary == duress {
            return Err(CredentialError::InvalidSecret(
                "duress secret must differ from the primary secret".into(),
            ));
        }

        let record = FailsafeRecord {
            primary: hash_secret(primary)?,
            duress: hash_secret(duress)?,
            configured_at: Utc::now(),
            last_trigger: None,
            last_invalidation: None,
        };
        self.records.insert(owner.clone(), record);
        tracing::info!(owner = %owner, "failsafe configured");
        Ok(())
    }

    pub fn is_configured(&self, owner: &OwnerId) -> bool {
        self.records.contains_key(owner)
    }

    /// Match a presented secret against the owner's registered secrets.
    pub fn classify(&self, owner: &OwnerId, presented: &str) -> Result<SecretMatch, CredentialError> {
        let (primary, duress) = {
            let record = self
                .records
                .get(owner)
                .ok_or_else(|| CredentialError::FailsafeNotConfigured(owner.to_string()))?;
            (record.primary.clone(), record.duress.clone())
        };
        if verify_secret(presented, &primary)? {
            return Ok(SecretMatch::Primary);
        }
        if verify_secret(presented, &duress)? {
            return Ok(SecretMatch::Duress);
        }
        Ok(SecretMatch::NoMatch)
    }

    /// Run the failsafe if `presented` is the owner's duress secret.
    pub fn trigger(
        &self,
        owner: &OwnerId,
        presented: &str,
        digest: Digest,
    ) -> Result<FailsafeOutcome, CredentialError> {
        match self.classify(owner, presented)? {
            SecretMatch::Duress => Ok(self.execute(owner, digest)),
            SecretMatch::Primary | SecretMatch::NoMatch => Err(CredentialError::Unauthorized(
                "secret does not match the duress secret".into(),
            )),
        }
    }

    /// Both failsafe steps, for a caller that already established duress.
    pub fn execute(&self, owner: &OwnerId, digest: Digest) -> FailsafeOutcome {
        let decoy = match self.store_decoy(owner, digest) {
            Ok(attestation) => DecoyOutcome::Created { attestation },
            Err(e) => {
                tracing::error!(owner = %owner, error = %e, "failsafe decoy could not be stored");
                DecoyOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        let invalidation = self.invalidate_latest(owner);
        let invalidated = invalidation.succeeded();

        if let Some(mut record) = self.records.get_mut(owner) {
            record.last_trigger = Some(Utc::now());
            record.last_invalidation = Some(invalidation.clone());
        }
        self.events.publish(EngineEvent::FailsafeTriggered {
            owner_id: owner.clone(),
            invalidated,
        });
        tracing::warn!(owner = %owner, invalidated, "failsafe triggered");

        FailsafeOutcome {
            decoy,
            invalidation,
        }
    }

    pub fn status(&self, owner: &OwnerId) -> FailsafeStatus {
        match self.records.get(owner) {
            Some(record) => FailsafeStatus {
                configured: true,
                last_trigger: record.last_trigger,
                last_invalidation: record.last_invalidation.clone(),
            },
            None => FailsafeStatus {
                configured: false,
                last_trigger: None,
                last_invalidation: None,
            },
        }
    }

    pub fn configured_at(&self, owner: &OwnerId) -> Option<DateTime<Utc>> {
        self.records.get(owner).map(|r| r.configured_at)
    }

    fn store_decoy(&self, owner: &OwnerId, digest: Digest) -> Result<Attestation, CredentialError> {
        let mut rng = rand::thread_rng();

        let credential_ref = self
            .credentials
            .current(owner)
            .map(|c| c.credential_ref())
            .unwrap_or_else(|| CredentialRef::new(owner.clone(), 1));
        let keyring_key_ref = self
            .keyring
            .key_ref_for(owner)
            .unwrap_or_else(|| KeyRef::from_fingerprint(rng.gen()));

        let mut signature = [0u8; 64];
        rng.fill(&mut signature[..]);

        let attestation = Attestation {
            id: Uuid::now_v7(),
            digest,
            keyring_signature: SignatureHex::from_bytes(&signature),
            keyring_key_ref,
            chain_tx_ref: ChainTxRef::from_bytes(rng.gen()),
            credential_ref,
            created_at: Utc::now(),
            authenticity: Authenticity::Decoy,
        };
        self.store.insert(attestation.clone())?;
        Ok(attestation)
    }

    fn invalidate_latest(&self, owner: &OwnerId) -> InvalidationOutcome {
        let mut retried = false;
        loop {
            let Some(current) = self.credentials.current(owner) else {
                let err = CredentialError::CredentialNotFound(owner.to_string());
                return invalidation_failed(owner, &err);
            };
            match self
                .credentials
                .invalidate(owner, current.version, InvalidationCause::Failsafe)
            {
                Ok(done) if done.already_invalidated => {
                    return InvalidationOutcome::AlreadyInvalidated {
                        credential_ref: done.credential.credential_ref(),
                    }
                }
                Ok(done) => {
                    return InvalidationOutcome::Invalidated {
                        credential_ref: done.credential.credential_ref(),
                    }
                }
                Err(CredentialError::Core(CoreError::Conflict { .. })) if !retried => {
                    tracing::debug!(owner = %owner, "failsafe invalidation raced, refetching");
                    retried = true;
                }
                Err(e) => return invalidation_failed(owner, &e),
            }
        }
    }
}

fn invalidation_failed(owner: &OwnerId, err: &CredentialError) -> InvalidationOutcome {
    tracing::error!(owner = %owner, error = %err, "failsafe invalidation failed");
    InvalidationOutcome::Failed {
        code: err.code(),
        message: err.to_string(),
    }
}
