//! Blocktrust Credentials: credential lifecycle, keyring, identity intake,
//! dual-signature verification and the duress failsafe.

pub mod error;
pub mod failsafe;
pub mod identity;
pub mod keyring;
pub mod registry;
pub mod verifier;

pub use error::CredentialError;
pub use failsafe::{
    DecoyOutcome, FailsafeOutcome, FailsafeProtocol, FailsafeStatus, InvalidationOutcome,
    SecretMatch,
};
pub use identity::{IdentityIntake, IdentityVerifiedEvent, ReviewAnswer};
pub use keyring::Keyring;
pub use registry::{CredentialRegistry, Invalidation};
pub use verifier::{DualSignatureVerifier, VerificationCheck, VerificationReport, VerificationRequest};
