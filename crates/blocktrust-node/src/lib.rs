//! Blocktrust node: the attestation engine wired to its adapters and served
//! over HTTP.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod node;
pub mod state;

pub use config::NodeConfig;
pub use engine::{AttestationEngine, CredentialHistory};
pub use error::NodeError;
pub use node::BlocktrustNode;
pub use state::NodeState;
