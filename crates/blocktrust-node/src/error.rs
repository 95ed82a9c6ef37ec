use blocktrust_anchor::{AnchorError, RejectionReason};
use blocktrust_core::{CoreError, ErrorBody, ErrorCode};
use blocktrust_credentials::CredentialError;

/// Errors surfaced by the node's engine facade.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failsafe step failed: {0}")]
    Failsafe(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl NodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Failsafe(_) => ErrorCode::Internal,
            Self::Core(e) => e.code(),
            Self::Credential(e) => e.code(),
        }
    }

    /// Wire form.
    ///
    /// Internal failures and chain-side failures carry a fixed message; the
    /// upstream detail stays in the attempt ledger and the logs.
    pub fn to_body(&self) -> ErrorBody {
        let code = self.code();
        let message = match (code, self.anchor_error()) {
            (ErrorCode::Internal, _) => "internal error".to_string(),
            (ErrorCode::WrongNetwork, Some(AnchorError::WrongNetwork { expected, .. })) => {
                format!("signer is not on chain {expected}")
            }
            (ErrorCode::UnsupportedContext, Some(AnchorError::UnsupportedContext { chain_id, .. })) => {
                format!("signer cannot be switched to chain {chain_id}")
            }
            (ErrorCode::SubmissionFailed, Some(AnchorError::SubmissionFailed { attempts, .. })) => {
                format!("anchoring failed after {attempts} attempts")
            }
            (ErrorCode::SubmissionRejected, Some(AnchorError::SubmissionRejected { reason, .. })) => {
                match reason {
                    RejectionReason::Reverted(_) => "anchoring transaction reverted".to_string(),
                    other => other.to_string(),
                }
            }
            _ => self.to_string(),
        };
        ErrorBody::new(code, message)
    }

    fn anchor_error(&self) -> Option<&AnchorError> {
        match self {
            Self::Credential(CredentialError::Anchor(e)) => Some(e),
            _ => None,
        }
    }
}
