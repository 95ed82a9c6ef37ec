//! Blocktrust Core: fundamental types, error codes, configuration, and the
//! credential lifecycle shared by every layer of the attestation engine.

pub mod config;
pub mod credential_state;
pub mod error;
pub mod events;
pub mod types;

pub use config::{
    ChainConfig, ChainParams, EngineConfig, EventsConfig, FailsafeConfig, IdentityConfig,
    IdentityMode, NativeCurrency, RetryConfig,
};
pub use credential_state::{
    CredentialEvent, CredentialStateMachine, CredentialStatus, InvalidationCause,
};
pub use error::{CoreError, ErrorBody, ErrorCode};
pub use events::{EngineEvent, EventBus, Subscription, SubscriptionId};
pub use types::{
    Attestation, AttestationView, Authenticity, ChainAddress, ChainTxRef, Credential,
    CredentialRef, Digest, HashAlgorithm, KeyRef, OwnerId, SignatureHex, DIGEST_LEN,
};
