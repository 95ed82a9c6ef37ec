use blocktrust_core::ErrorCode;

/// Cryptographic operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("secret hashing failed: {0}")]
    SecretHashError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CryptoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidKeyLength { .. } | Self::InvalidInput(_) => {
                ErrorCode::MalformedAttestation
            }
            Self::SignatureVerificationFailed => ErrorCode::Unauthorized,
            Self::SecretHashError(_) => ErrorCode::Internal,
        }
    }
}
