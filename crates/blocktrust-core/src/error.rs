use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credential_state::CredentialStatus;

/// Stable error codes exposed to callers.
///
/// Every crate-level error maps onto exactly one of these. The code is the
/// only part of an error an untrusted caller can rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidDigest,
    WrongNetwork,
    UnsupportedContext,
    SubmissionFailed,
    SubmissionRejected,
    MalformedAttestation,
    Conflict,
    CredentialInvalidated,
    NotFound,
    Unauthorized,
    InvalidSecret,
    Cancelled,
    Internal,
}

impl ErrorCode {
    /// Whether the error was raised by local validation, before any I/O.
    pub fn is_local_validation(&self) -> bool {
        matches!(self, Self::InvalidDigest | Self::MalformedAttestation)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Wire shape of an error: `{code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: CredentialStatus,
        to: CredentialStatus,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("malformed attestation: {0}")]
    MalformedAttestation(String),

    #[error("stale credential version for {owner}: expected {expected}, current {current}")]
    Conflict {
        owner: String,
        expected: u32,
        current: u32,
    },

    #[error("credential {0} is not active")]
    CredentialInvalidated(String),

    #[error("listener limit reached ({0})")]
    TooManyListeners(usize),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidDigest(_) => ErrorCode::InvalidDigest,
            Self::InvalidStateTransition { .. } => ErrorCode::Conflict,
            Self::ValidationError(_) => ErrorCode::MalformedAttestation,
            Self::MalformedAttestation(_) => ErrorCode::MalformedAttestation,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::CredentialInvalidated(_) => ErrorCode::CredentialInvalidated,
            Self::TooManyListeners(_) => ErrorCode::Internal,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            Self::TooManyListeners(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ErrorBody::new(self.code(), message)
    }
}
