use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CryptoError;

/// Argon2id hash of a user secret, in PHC string form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretHash(String);

impl SecretHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretHash(..)")
    }
}

/// Hash a secret with a fresh random salt.
pub fn hash_secret(secret: &str) -> Result<SecretHash, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| CryptoError::SecretHashError(format!("argon2 hash failed: {}", e)))?;
    Ok(SecretHash(hash.to_string()))
}

/// Check a presented secret against a stored hash.
pub fn verify_secret(secret: &str, stored: &SecretHash) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(&stored.0)
        .map_err(|e| CryptoError::SecretHashError(format!("invalid hash format: {}", e)))?;

    match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::SecretHashError(format!(
            "verification error: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let h = hash_secret("correct horse").unwrap();
        assert!(h.as_str().starts_with("$argon2id$"));
        assert!(verify_secret("correct horse", &h).unwrap());
        assert!(!verify_secret("wrong horse", &h).unwrap());
    }

    #[test]
    fn test_salted() {
        let a = hash_secret("same secret").unwrap();
        let b = hash_secret("same secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_garbage_hash_is_error() {
        let bogus = SecretHash("not-a-phc-string".into());
        assert!(verify_secret("anything", &bogus).is_err());
    }

    #[test]
    fn test_debug_hides_hash() {
        let h = hash_secret("hidden").unwrap();
        assert_eq!(format!("{:?}", h), "SecretHash(..)");
    }
}
