//! Process-wide notification bus.
//!
//! Components publish [`EngineEvent`]s; UI layers and auditors subscribe.
//! The listener set is bounded and every subscriber owns its own buffer, so a
//! slow listener never blocks a publisher.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::credential_state::InvalidationCause;
use crate::error::CoreError;
use crate::types::{ChainTxRef, CredentialRef, Digest, OwnerId};

/// Events emitted by the attestation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    AttestationAnchored {
        digest: Digest,
        chain_tx_ref: ChainTxRef,
        credential_ref: CredentialRef,
    },
    SubmissionAttemptFailed {
        digest: Digest,
        attempt: u32,
        reason: String,
    },
    NetworkSwitched {
        from_chain_id: u64,
        to_chain_id: u64,
    },
    CredentialActivated {
        credential_ref: CredentialRef,
    },
    CredentialInvalidated {
        credential_ref: CredentialRef,
        cause: InvalidationCause,
    },
    FailsafeTriggered {
        owner_id: OwnerId,
        invalidated: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription. Drop it, or call [`EventBus::unsubscribe`], to leave.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<EngineEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.receiver.try_recv().ok()
    }
}

pub struct EventBus {
    listeners: Mutex<HashMap<SubscriptionId, mpsc::Sender<EngineEvent>>>,
    next_id: AtomicU64,
    max_listeners: usize,
    capacity: usize,
}

impl EventBus {
    pub fn new(max_listeners: usize, capacity: usize) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_listeners,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, mpsc::Sender<EngineEvent>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Result<Subscription, CoreError> {
        let mut listeners = self.lock();
        listeners.retain(|_, tx| !tx.is_closed());
        if listeners.len() >= self.max_listeners {
            return Err(CoreError::TooManyListeners(self.max_listeners));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        listeners.insert(id, tx);
        tracing::debug!(subscription = id.0, total = listeners.len(), "event listener added");
        Ok(Subscription { id, receiver: rx })
    }

    /// Returns whether the subscription was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().values().filter(|tx| !tx.is_closed()).count()
    }

    /// Deliver to every listener without waiting.
    pub fn publish(&self, event: EngineEvent) {
        let mut listeners = self.lock();
        listeners.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscription = id.0, "event listener full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16, 64)
    }
}
