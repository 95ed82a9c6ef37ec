//! Blocktrust Crypto: the hash engine plus the keyring and secret primitives
//! the attestation engine signs and authenticates with.

pub mod error;
pub mod hashing;
pub mod keys;
pub mod secret;
pub mod signing;

pub use error::CryptoError;
pub use hashing::{compute_digest, normalize, normalize_with, operation_id, DigestExt};
pub use keys::{KeyPair, PublicKey};
pub use secret::{hash_secret, verify_secret, SecretHash};
pub use signing::{sign_digest, verify_digest_signature};
