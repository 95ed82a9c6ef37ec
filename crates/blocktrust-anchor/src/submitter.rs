use blocktrust_core::{
    Attestation, Authenticity, ChainAddress, ChainTxRef, CredentialRef, Digest, EngineEvent, EventBus, KeyRef,
    SignatureHex,
};
use blocktrust_crypto::operation_id;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AnchorError, RegistryError};
use crate::ledger::{AttemptEntry, AttemptLedger, AttemptOutcome};
use crate::network::NetworkContextGuard;
use crate::retry::RetryPolicy;
use crate::store::AttestationStore;
use crate::traits::AnchorRegistry;
use crate::types::{AnchorReceipt, AnchorRequest};

/// Everything needed to anchor one signed digest.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub digest: Digest,
    pub credential_ref: CredentialRef,
    /// Holder address of the credential; signs the anchoring transaction.
    pub signer: ChainAddress,
    pub keyring_signature: SignatureHex,
    pub keyring_key_ref: KeyRef,
}

/// Anchors digests on-chain and records the resulting attestations.
pub struct AttestationSubmitter {
    registry: Arc<dyn AnchorRegistry>,
    guard: NetworkContextGuard,
    store: Arc<AttestationStore>,
    ledger: Arc<AttemptLedger>,
    policy: RetryPolicy,
    events: Arc<EventBus>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl AttestationSubmitter {
    pub fn new(
        registry: Arc<dyn AnchorRegistry>,
        guard: NetworkContextGuard,
        store: Arc<AttestationStore>,
        ledger: Arc<AttemptLedger>,
        policy: RetryPolicy,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            guard,
            store,
            ledger,
            policy,
            events,
            in_flight: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<AttestationStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<AttemptLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<dyn AnchorRegistry> {
        &self.registry
    }

    pub async fn submit(&self, request: SubmissionRequest) -> Result<Attestation, AnchorError> {
        self.submit_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Submit, stopping client-side retries once `cancel` fires.
    ///
    /// A transaction already mined stays mined; cancelling only abandons the
    /// remaining attempts.
    pub async fn submit_cancellable(
        &self,
        request: SubmissionRequest,
        cancel: &CancellationToken,
    ) -> Result<Attestation, AnchorError> {
        let op_id = operation_id(&request.digest, &request.credential_ref);
        let slot = self.in_flight.entry(op_id.clone()).or_default().clone();
        let result = {
            let _serialized = slot.lock().await;
            self.submit_serialized(&op_id, request, cancel).await
        };
        drop(slot);
        self.in_flight
            .remove_if(&op_id, |_, slot| Arc::strong_count(slot) == 1);
        result
    }

    async fn submit_serialized(
        &self,
        op_id: &str,
        request: SubmissionRequest,
        cancel: &CancellationToken,
    ) -> Result<Attestation, AnchorError> {
        if let Some(existing) = self
            .store
            .find_genuine(&request.digest, &request.credential_ref)
        {
            tracing::info!(
                operation_id = %op_id,
                tx_ref = %existing.chain_tx_ref,
                "digest already attested for this credential"
            );
            return Ok(existing);
        }

        let chain_id = self.guard.expected_chain_id();
        let commitment = request.credential_ref.commitment();
        let mut attempts: Vec<AttemptEntry> = Vec::new();
        let mut last_error = String::new();
        // Hash of a send whose receipt never arrived.
        let mut pending: Option<ChainTxRef> = None;

        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(self.cancelled(op_id, attempts)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(self.cancelled(op_id, attempts));
            }

            if let Err(err) = self.guard.ensure_context(chain_id).await {
                self.record(
                    &mut attempts,
                    op_id,
                    attempt,
                    delay,
                    chain_id,
                    &request.digest,
                    AttemptOutcome::ContextFailure {
                        reason: err.to_string(),
                    },
                );
                return Err(err);
            }

            if let Some(tx_ref) = pending.clone() {
                match self.registry.resolve(&tx_ref).await {
                    Ok(Some(record))
                        if record.digest == *request.digest.as_bytes()
                            && record.credential_commitment == commitment
                            && record.signer == request.signer =>
                    {
                        self.record(
                            &mut attempts,
                            op_id,
                            attempt,
                            delay,
                            chain_id,
                            &request.digest,
                            AttemptOutcome::Adopted {
                                tx_ref: record.tx_ref.clone(),
                            },
                        );
                        return self.finish(&request, record.receipt());
                    }
                    Ok(Some(_)) => {
                        tracing::warn!(operation_id = %op_id, %tx_ref, "pending transaction mined a different anchor");
                        pending = None;
                    }
                    Ok(None) => {
                        let reason = format!("transaction {tx_ref} still pending");
                        self.record(
                            &mut attempts,
                            op_id,
                            attempt,
                            delay,
                            chain_id,
                            &request.digest,
                            AttemptOutcome::Pending { tx_ref },
                        );
                        self.attempt_failed(&request.digest, attempt, &reason);
                        last_error = reason;
                        continue;
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.record(
                            &mut attempts,
                            op_id,
                            attempt,
                            delay,
                            chain_id,
                            &request.digest,
                            AttemptOutcome::TransientFailure {
                                reason: reason.clone(),
                            },
                        );
                        self.attempt_failed(&request.digest, attempt, &reason);
                        last_error = reason;
                        continue;
                    }
                }
            }

            if attempt > 1 {
                match self.registry.lookup_anchor(&request.digest, &commitment).await {
                    Ok(Some(record)) if record.signer == request.signer => {
                        self.record(
                            &mut attempts,
                            op_id,
                            attempt,
                            delay,
                            chain_id,
                            &request.digest,
                            AttemptOutcome::Adopted {
                                tx_ref: record.tx_ref.clone(),
                            },
                        );
                        return self.finish(&request, record.receipt());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(operation_id = %op_id, error = %e, "pre-retry anchor lookup failed");
                    }
                }
            }

            let anchor_request = AnchorRequest {
                digest: request.digest,
                credential_commitment: commitment,
                signer: request.signer.clone(),
            };

            match self.registry.anchor(&anchor_request).await {
                Ok(receipt) => {
                    self.record(
                        &mut attempts,
                        op_id,
                        attempt,
                        delay,
                        chain_id,
                        &request.digest,
                        AttemptOutcome::Anchored {
                            tx_ref: receipt.tx_ref.clone(),
                        },
                    );
                    return self.finish(&request, receipt);
                }
                Err(RegistryError::Definitive(reason)) => {
                    self.record(
                        &mut attempts,
                        op_id,
                        attempt,
                        delay,
                        chain_id,
                        &request.digest,
                        AttemptOutcome::Rejected {
                            reason: reason.clone(),
                        },
                    );
                    return Err(AnchorError::SubmissionRejected {
                        reason,
                        ledger: attempts,
                    });
                }
                Err(RegistryError::Pending(tx_ref)) => {
                    let reason = format!("transaction {tx_ref} not mined yet");
                    self.record(
                        &mut attempts,
                        op_id,
                        attempt,
                        delay,
                        chain_id,
                        &request.digest,
                        AttemptOutcome::Pending {
                            tx_ref: tx_ref.clone(),
                        },
                    );
                    self.attempt_failed(&request.digest, attempt, &reason);
                    last_error = reason;
                    pending = Some(tx_ref);
                }
                Err(RegistryError::Transient(reason)) => {
                    self.record(
                        &mut attempts,
                        op_id,
                        attempt,
                        delay,
                        chain_id,
                        &request.digest,
                        AttemptOutcome::TransientFailure {
                            reason: reason.clone(),
                        },
                    );
                    self.attempt_failed(&request.digest, attempt, &reason);
                    last_error = reason;
                }
            }
        }

        tracing::error!(
            operation_id = %op_id,
            attempts = self.policy.max_attempts,
            last_error = %last_error,
            "anchoring retries exhausted"
        );
        Err(AnchorError::SubmissionFailed {
            attempts: self.policy.max_attempts,
            last_error,
            ledger: attempts,
        })
    }

    fn attempt_failed(&self, digest: &Digest, attempt: u32, reason: &str) {
        self.events.publish(EngineEvent::SubmissionAttemptFailed {
            digest: *digest,
            attempt,
            reason: reason.to_string(),
        });
    }

    fn finish(
        &self,
        request: &SubmissionRequest,
        receipt: AnchorReceipt,
    ) -> Result<Attestation, AnchorError> {
        let attestation = Attestation {
            id: Uuid::now_v7(),
            digest: request.digest,
            keyring_signature: request.keyring_signature.clone(),
            keyring_key_ref: request.keyring_key_ref.clone(),
            chain_tx_ref: receipt.tx_ref,
            credential_ref: request.credential_ref.clone(),
            created_at: receipt.anchored_at,
            authenticity: Authenticity::Genuine,
        };
        self.store.insert(attestation.clone())?;
        self.events.publish(EngineEvent::AttestationAnchored {
            digest: attestation.digest,
            chain_tx_ref: attestation.chain_tx_ref.clone(),
            credential_ref: attestation.credential_ref.clone(),
        });
        Ok(attestation)
    }

    fn cancelled(&self, op_id: &str, attempts: Vec<AttemptEntry>) -> AnchorError {
        tracing::info!(operation_id = %op_id, attempts = attempts.len(), "submission cancelled");
        AnchorError::Cancelled { ledger: attempts }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        attempts: &mut Vec<AttemptEntry>,
        op_id: &str,
        attempt: u32,
        delay: Duration,
        chain_id: u64,
        digest: &Digest,
        outcome: AttemptOutcome,
    ) {
        let entry = AttemptEntry {
            operation_id: op_id.to_string(),
            attempt_number: attempt,
            delay_before_attempt_ms: delay.as_millis() as u64,
            chain_id,
            digest: *digest,
            outcome,
            recorded_at: Utc::now(),
        };
        tracing::info!(
            target: "blocktrust::transactions",
            operation_id = %entry.operation_id,
            attempt = entry.attempt_number,
            delay_ms = entry.delay_before_attempt_ms,
            chain_id = entry.chain_id,
            algorithm = %entry.digest.algorithm(),
            digest = %entry.digest,
            outcome = entry.outcome.label(),
            registry = self.registry.registry_id(),
            "anchoring attempt"
        );
        self.ledger.append(entry.clone());
        attempts.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryChainContext, MemoryRegistry, ScriptedFault};
    use crate::error::RejectionReason;
    use blocktrust_core::{ChainConfig, HashAlgorithm, OwnerId};

    struct Harness {
        registry: Arc<MemoryRegistry>,
        context: Arc<MemoryChainContext>,
        submitter: AttestationSubmitter,
    }

    fn harness() -> Harness {
        let registry = Arc::new(MemoryRegistry::new());
        let context = Arc::new(MemoryChainContext::new(137));
        let guard = NetworkContextGuard::new(context.clone(), ChainConfig::default());
        let submitter = AttestationSubmitter::new(
            registry.clone(),
            guard,
            Arc::new(AttestationStore::new()),
            Arc::new(AttemptLedger::new()),
            RetryPolicy::new(3, Duration::from_millis(2000)),
            Arc::new(EventBus::default()),
        );
        Harness {
            registry,
            context,
            submitter,
        }
    }

    fn request() -> SubmissionRequest {
        SubmissionRequest {
            digest: Digest::new([0x42; 32], HashAlgorithm::ContentHash),
            credential_ref: CredentialRef::new(OwnerId::new("alice").unwrap(), 1),
            signer: ChainAddress::parse("0x00000000000000000000000000000000000000aa").unwrap(),
            keyring_signature: SignatureHex::from_bytes(&[1u8; 64]),
            keyring_key_ref: KeyRef::from_fingerprint([2u8; 20]),
        }
    }

    fn delays(entries: &[AttemptEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.delay_before_attempt_ms).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let h = harness();
        let att = h.submitter.submit(request()).await.unwrap();
        assert!(att.is_genuine());
        assert_eq!(h.registry.anchor_calls(), 1);

        let op = operation_id(&att.digest, &att.credential_ref);
        let entries = h.submitter.ledger().entries(&op);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chain_id, 137);
        assert_eq!(entries[0].digest.algorithm(), HashAlgorithm::ContentHash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_twice_then_success_backoff() {
        let h = harness();
        h.registry.push_transient("timeout");
        h.registry.push_transient("nonce too low");

        let started = tokio::time::Instant::now();
        let att = h.submitter.submit(request()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(6000));

        let entries = h
            .submitter
            .ledger()
            .entries(&operation_id(&att.digest, &att.credential_ref));
        assert_eq!(entries.len(), 3);
        assert_eq!(delays(&entries), vec![0, 2000, 4000]);
        assert!(entries[2].outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let h = harness();
        for _ in 0..3 {
            h.registry.push_transient("gateway timeout");
        }
        let err = h.submitter.submit(request()).await.unwrap_err();
        match &err {
            AnchorError::SubmissionFailed { attempts, ledger, .. } => {
                assert_eq!(*attempts, 3);
                assert_eq!(ledger.len(), 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.submitter.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_definitive_rejection_not_retried() {
        let h = harness();
        h.registry.push_fault(ScriptedFault::Fail(RegistryError::Definitive(
            RejectionReason::InsufficientFunds,
        )));
        let err = h.submitter.submit(request()).await.unwrap_err();
        assert!(matches!(
            err,
            AnchorError::SubmissionRejected {
                reason: RejectionReason::InsufficientFunds,
                ..
            }
        ));
        assert_eq!(err.ledger().len(), 1);
        assert_eq!(h.registry.anchor_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submission_returns_first() {
        let h = harness();
        let first = h.submitter.submit(request()).await.unwrap();
        let second = h.submitter.submit(request()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.registry.anchor_calls(), 1);
        assert_eq!(h.submitter.store().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicates_anchor_once() {
        let h = harness();
        let (a, b) = tokio::join!(h.submitter.submit(request()), h.submitter.submit(request()));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(h.registry.anchor_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_receipt_is_adopted_on_retry() {
        let h = harness();
        h.registry
            .push_fault(ScriptedFault::MineThenFail("receipt timeout".into()));
        let att = h.submitter.submit(request()).await.unwrap();

        assert_eq!(h.registry.anchor_calls(), 1);
        assert_eq!(h.registry.record_count(), 1);
        let entries = h
            .submitter
            .ledger()
            .entries(&operation_id(&att.digest, &att.credential_ref));
        assert!(matches!(entries[1].outcome, AttemptOutcome::Adopted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmined_send_is_polled_not_resent() {
        let h = harness();
        h.registry
            .push_fault(ScriptedFault::Unconfirmed { polls: 1 });
        let att = h.submitter.submit(request()).await.unwrap();

        assert_eq!(h.registry.anchor_calls(), 1);
        assert_eq!(h.registry.record_count(), 1);
        let entries = h
            .submitter
            .ledger()
            .entries(&operation_id(&att.digest, &att.credential_ref));
        let labels: Vec<&str> = entries.iter().map(|e| e.outcome.label()).collect();
        assert_eq!(labels, ["pending", "pending", "adopted"]);
        assert_eq!(delays(&entries), vec![0, 2000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_slots_are_released() {
        let h = harness();
        h.submitter.submit(request()).await.unwrap();
        for _ in 0..3 {
            h.registry.push_transient("timeout");
        }
        let mut other = request();
        other.digest = Digest::new([0x43; 32], HashAlgorithm::ContentHash);
        assert!(h.submitter.submit(other).await.is_err());
        assert!(h.submitter.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_network_blocks_anchoring() {
        let h = harness();
        h.context.set_current(1);
        h.context.set_reject_switch(true);
        let err = h.submitter.submit(request()).await.unwrap_err();
        assert!(matches!(err, AnchorError::WrongNetwork { .. }));
        assert_eq!(h.registry.anchor_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_checked_before_each_attempt() {
        let h = harness();
        h.registry.push_transient("timeout");
        h.context.set_current(1);
        h.context.register_known(137);
        h.submitter.submit(request()).await.unwrap();
        // The guard switched back before the first attempt.
        assert_eq!(h.context.current(), 137);
        assert_eq!(h.registry.anchor_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retries() {
        let h = harness();
        h.registry.push_transient("timeout");
        h.registry.push_transient("timeout");
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let err = h
            .submitter
            .submit_cancellable(request(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::Cancelled { ref ledger } if ledger.len() == 1));
        assert_eq!(h.registry.anchor_calls(), 1);
    }
}
