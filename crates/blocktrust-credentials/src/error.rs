use blocktrust_anchor::AnchorError;
use blocktrust_core::{CoreError, ErrorCode};
use blocktrust_crypto::CryptoError;

/// Credential layer errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential for owner {0}")]
    CredentialNotFound(String),

    #[error("no keyring key enrolled for {0}")]
    KeyNotFound(String),

    #[error("failsafe not configured for {0}")]
    FailsafeNotConfigured(String),

    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid identity event: {0}")]
    InvalidEvent(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Anchor(#[from] AnchorError),
}

impl CredentialError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CredentialNotFound(_) | Self::KeyNotFound(_) | Self::FailsafeNotConfigured(_) => {
                ErrorCode::NotFound
            }
            Self::InvalidSecret(_) => ErrorCode::InvalidSecret,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::InvalidEvent(_) => ErrorCode::MalformedAttestation,
            Self::Configuration(_) => ErrorCode::Internal,
            Self::Core(e) => e.code(),
            Self::Crypto(e) => e.code(),
            Self::Anchor(e) => e.code(),
        }
    }
}
