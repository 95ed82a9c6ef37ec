//! Blocktrust Anchor
//!
//! Records document digests on the anchoring chain. The
//! [`AttestationSubmitter`] drives submissions through a mandatory
//! [`NetworkContextGuard`] check, retries transient faults with exponential
//! backoff and journals every attempt in the [`AttemptLedger`]. Chain access is
//! pluggable through the [`ChainContext`] and [`AnchorRegistry`] traits.

pub mod adapters;
pub mod error;
pub mod ledger;
pub mod network;
pub mod retry;
pub mod store;
pub mod submitter;
pub mod traits;
pub mod types;

pub use error::{AnchorError, ContextError, RegistryError, RejectionReason};
pub use ledger::{AttemptEntry, AttemptLedger, AttemptOutcome};
pub use network::NetworkContextGuard;
pub use retry::RetryPolicy;
pub use store::AttestationStore;
pub use submitter::{AttestationSubmitter, SubmissionRequest};
pub use traits::{AnchorRegistry, ChainContext};
pub use types::{AnchorReceipt, AnchorRecord, AnchorRequest};
