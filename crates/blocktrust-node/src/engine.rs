//! The attestation engine: every component wired together behind the
//! operations the API exposes.

use blocktrust_anchor::{
    AnchorRegistry, AttemptLedger, AttestationStore, AttestationSubmitter, ChainContext,
    NetworkContextGuard, RetryPolicy, SubmissionRequest,
};
use blocktrust_core::{
    AttestationView, ChainTxRef, CoreError, Credential, Digest, EngineConfig, EventBus, HashAlgorithm,
    InvalidationCause, OwnerId,
};
use blocktrust_credentials::{
    CredentialError, CredentialRegistry, DualSignatureVerifier, FailsafeOutcome,
    FailsafeProtocol, FailsafeStatus, IdentityIntake, Keyring, SecretMatch, VerificationReport,
    VerificationRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;

/// Current version plus the full version history of one owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialHistory {
    pub current: Option<Credential>,
    pub history: Vec<Credential>,
}

pub struct AttestationEngine {
    events: Arc<EventBus>,
    credentials: Arc<CredentialRegistry>,
    keyring: Arc<Keyring>,
    store: Arc<AttestationStore>,
    submitter: AttestationSubmitter,
    verifier: DualSignatureVerifier,
    failsafe: FailsafeProtocol,
    identity: IdentityIntake,
    shutdown: CancellationToken,
}

impl AttestationEngine {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<dyn AnchorRegistry>,
        context: Arc<dyn ChainContext>,
    ) -> Result<Self, NodeError> {
        let events = Arc::new(EventBus::new(
            config.events.max_listeners,
            config.events.channel_capacity,
        ));
        let credentials = Arc::new(CredentialRegistry::new(Arc::clone(&events)));
        let keyring = Arc::new(Keyring::new());
        let store = Arc::new(AttestationStore::new());

        let guard = NetworkContextGuard::new(context, config.chain.clone())
            .with_events(Arc::clone(&events));
        let submitter = AttestationSubmitter::new(
            Arc::clone(&registry),
            guard,
            Arc::clone(&store),
            Arc::new(AttemptLedger::new()),
            RetryPolicy::from_config(&config.retry),
            Arc::clone(&events),
        );
        let verifier = DualSignatureVerifier::new(
            Arc::clone(&keyring),
            registry,
            Arc::clone(&credentials),
        );
        let failsafe = FailsafeProtocol::new(
            &config.failsafe,
            Arc::clone(&credentials),
            Arc::clone(&keyring),
            Arc::clone(&store),
            Arc::clone(&events),
        );
        let identity = IdentityIntake::new(&config.identity, Arc::clone(&credentials))?;

        Ok(Self {
            events,
            credentials,
            keyring,
            store,
            submitter,
            verifier,
            failsafe,
            identity,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn credentials(&self) -> &Arc<CredentialRegistry> {
        &self.credentials
    }

    pub fn submitter(&self) -> &AttestationSubmitter {
        &self.submitter
    }

    /// Cancels in-flight submissions' remaining retries.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn normalize(&self, raw: &str, algorithm: Option<&str>) -> Result<Digest, NodeError> {
        let algorithm = parse_algorithm(algorithm)?;
        Ok(Digest::normalize(raw, algorithm)?)
    }

    /// Sign and anchor `digest` for `owner`.
    ///
    /// The primary secret produces a genuine attestation. The duress secret
    /// runs the failsafe and answers with the decoy, in the same shape.
    pub async fn attest(
        &self,
        owner: &OwnerId,
        secret: &str,
        digest: Digest,
    ) -> Result<AttestationView, NodeError> {
        match self.failsafe.classify(owner, secret)? {
            SecretMatch::Primary => {}
            SecretMatch::Duress => {
                let outcome = self.failsafe.execute(owner, digest);
                return outcome
                    .decoy_attestation()
                    .map(|a| a.public_view())
                    .ok_or_else(|| NodeError::Failsafe("decoy could not be stored".into()));
            }
            SecretMatch::NoMatch => {
                return Err(CredentialError::Unauthorized("secret does not match".into()).into())
            }
        }

        let current = self
            .credentials
            .current(owner)
            .ok_or_else(|| CredentialError::CredentialNotFound(owner.to_string()))?;
        let credential = self.credentials.require_usable(&current.credential_ref())?;

        self.keyring.ensure_enrolled(owner);
        let (keyring_signature, keyring_key_ref) = self.keyring.sign(owner, &digest)?;

        let request = SubmissionRequest {
            digest,
            credential_ref: credential.credential_ref(),
            signer: credential.holder_address.clone(),
            keyring_signature,
            keyring_key_ref,
        };
        let attestation = self
            .submitter
            .submit_cancellable(request, &self.shutdown)
            .await
            .map_err(CredentialError::from)?;
        Ok(attestation.public_view())
    }

    pub async fn verify(&self, request: &VerificationRequest) -> Result<VerificationReport, NodeError> {
        Ok(self.verifier.verify(request).await?)
    }

    /// Public view of a stored attestation, genuine or decoy alike.
    pub fn attestation_by_tx(&self, tx_ref: &str) -> Result<AttestationView, NodeError> {
        let tx_ref = ChainTxRef::parse(tx_ref)?;
        self.store
            .get_by_tx(&tx_ref)
            .map(|a| a.public_view())
            .ok_or_else(|| NodeError::NotFound(format!("attestation {tx_ref}")))
    }

    pub fn configure_failsafe(&self, owner: &OwnerId, primary: &str, duress: &str) -> Result<(), NodeError> {
        Ok(self.failsafe.configure(owner, primary, duress)?)
    }

    pub fn trigger_failsafe(
        &self,
        owner: &OwnerId,
        presented: &str,
        digest: Digest,
    ) -> Result<FailsafeOutcome, NodeError> {
        Ok(self.failsafe.trigger(owner, presented, digest)?)
    }

    pub fn failsafe_status(&self, owner: &OwnerId) -> FailsafeStatus {
        self.failsafe.status(owner)
    }

    /// Apply an identity-provider webhook. Approved owners also get a keyring key.
    pub fn identity_verified(
        &self,
        payload: &[u8],
        payload_digest: Option<&str>,
    ) -> Result<Option<Credential>, NodeError> {
        let credential = self.identity.accept(payload, payload_digest)?;
        if let Some(credential) = &credential {
            self.keyring.ensure_enrolled(&credential.owner_id);
        }
        Ok(credential)
    }

    pub fn revoke(&self, owner: &OwnerId, expected_version: u32) -> Result<Credential, NodeError> {
        let outcome = self
            .credentials
            .invalidate(owner, expected_version, InvalidationCause::User)?;
        Ok(outcome.credential)
    }

    pub fn credential_history(&self, owner: &OwnerId) -> Result<CredentialHistory, NodeError> {
        let history = self.credentials.history(owner);
        if history.is_empty() {
            return Err(CredentialError::CredentialNotFound(owner.to_string()).into());
        }
        Ok(CredentialHistory {
            current: history.last().cloned(),
            history,
        })
    }
}

pub fn parse_algorithm(raw: Option<&str>) -> Result<HashAlgorithm, NodeError> {
    match raw {
        Some(raw) => raw
            .parse::<HashAlgorithm>()
            .map_err(|_| CoreError::InvalidDigest(format!("unknown hash algorithm '{raw}'")).into()),
        None => Ok(HashAlgorithm::default()),
    }
}
