use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// The states of an identity credential version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    /// Token minted after identity verification, not yet usable.
    Minted,
    /// Credential is active and may back new attestations.
    Active,
    /// Credential has been invalidated. Final state for this version.
    Invalidated,
}

impl CredentialStatus {
    /// Whether this is a final (terminal) state.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Invalidated)
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minted => write!(f, "minted"),
            Self::Active => write!(f, "active"),
            Self::Invalidated => write!(f, "invalidated"),
        }
    }
}

/// Why a credential was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationCause {
    /// The owner (or an operator on their behalf) revoked it.
    User,
    /// The duress secret was presented.
    Failsafe,
}

impl fmt::Display for InvalidationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Failsafe => write!(f, "failsafe"),
        }
    }
}

/// Events that trigger credential state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialEvent {
    /// External identity verification confirmed.
    Activate,
    /// Explicit revocation or failsafe trigger.
    Invalidate(InvalidationCause),
}

/// Credential transition rules.
///
/// Valid transitions:
/// - Minted → Active (Activate)
/// - Minted → Invalidated (Invalidate)
/// - Active → Invalidated (Invalidate)
///
/// There is no way back out of `Invalidated`; recovery mints a new version.
pub struct CredentialStateMachine;

impl CredentialStateMachine {
    /// Attempt a state transition based on an event.
    pub fn transition(
        current: CredentialStatus,
        event: CredentialEvent,
    ) -> Result<CredentialStatus, CoreError> {
        let new_state = match (current, event) {
            (CredentialStatus::Minted, CredentialEvent::Activate) => CredentialStatus::Active,
            (CredentialStatus::Minted, CredentialEvent::Invalidate(_)) => {
                CredentialStatus::Invalidated
            }
            (CredentialStatus::Active, CredentialEvent::Invalidate(_)) => {
                CredentialStatus::Invalidated
            }
            _ => {
                let target = match event {
                    CredentialEvent::Activate => CredentialStatus::Active,
                    CredentialEvent::Invalidate(_) => CredentialStatus::Invalidated,
                };
                return Err(CoreError::InvalidStateTransition {
                    from: current,
                    to: target,
                });
            }
        };

        tracing::debug!(
            from = %current,
            to = %new_state,
            event = ?event,
            "credential state transition"
        );

        Ok(new_state)
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: CredentialStatus, event: CredentialEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
