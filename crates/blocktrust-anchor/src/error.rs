use blocktrust_core::{ChainTxRef, CoreError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::AttemptEntry;

/// Failures reported by a signer's chain context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("chain {0} is not registered with the signer")]
    UnrecognizedChain(u64),

    #[error("signer rejected the request: {0}")]
    Rejected(String),

    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Why a submission was refused for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    Reverted(String),
    SignerDeclined,
    InsufficientFunds,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reverted(msg) => write!(f, "transaction reverted: {}", msg),
            Self::SignerDeclined => write!(f, "signer declined the transaction"),
            Self::InsufficientFunds => write!(f, "insufficient funds for gas"),
        }
    }
}

/// Failures reported by an anchor registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Timeouts, transport faults, nonce or gas estimation errors.
    #[error("transient registry failure: {0}")]
    Transient(String),

    /// Sent, but no receipt yet. The hash must be polled before sending again.
    #[error("transaction {0} sent but not mined yet")]
    Pending(ChainTxRef),

    #[error("{0}")]
    Definitive(RejectionReason),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Pending(_))
    }
}

/// Anchoring-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("wrong network: expected chain {expected}, signer is on {actual:?}: {reason}")]
    WrongNetwork {
        expected: u64,
        actual: Option<u64>,
        reason: String,
    },

    #[error("unsupported chain context {chain_id}: {reason}")]
    UnsupportedContext { chain_id: u64, reason: String },

    #[error("submission failed after {attempts} attempts: {last_error}")]
    SubmissionFailed {
        attempts: u32,
        last_error: String,
        ledger: Vec<AttemptEntry>,
    },

    #[error("submission rejected: {reason}")]
    SubmissionRejected {
        reason: RejectionReason,
        ledger: Vec<AttemptEntry>,
    },

    #[error("submission cancelled after {} attempts", .ledger.len())]
    Cancelled { ledger: Vec<AttemptEntry> },

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("attestation already stored: {0}")]
    DuplicateAttestation(uuid::Uuid),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AnchorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::WrongNetwork { .. } => ErrorCode::WrongNetwork,
            Self::UnsupportedContext { .. } => ErrorCode::UnsupportedContext,
            Self::SubmissionFailed { .. } => ErrorCode::SubmissionFailed,
            Self::SubmissionRejected { .. } => ErrorCode::SubmissionRejected,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::RegistryUnavailable(_) | Self::DuplicateAttestation(_) => ErrorCode::Internal,
            Self::Core(e) => e.code(),
        }
    }

    /// Attempts recorded before the failure, empty when none were made.
    pub fn ledger(&self) -> &[AttemptEntry] {
        match self {
            Self::SubmissionFailed { ledger, .. }
            | Self::SubmissionRejected { ledger, .. }
            | Self::Cancelled { ledger } => ledger,
            _ => &[],
        }
    }
}
