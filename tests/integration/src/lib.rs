//! Fixtures shared by the cross-crate flows in `tests/`.

use blocktrust_anchor::adapters::{MemoryChainContext, MemoryRegistry};
use blocktrust_core::{
    ChainAddress, Credential, EngineConfig, IdentityConfig, IdentityMode, OwnerId,
};
use blocktrust_credentials::IdentityVerifiedEvent;
use blocktrust_node::AttestationEngine;
use std::sync::Arc;

pub const PRIMARY: &str = "primary-secret";
pub const DURESS: &str = "duress-secret";

/// An engine on in-memory adapters, with handles to both adapters.
pub struct Harness {
    pub engine: AttestationEngine,
    pub registry: Arc<MemoryRegistry>,
    pub context: Arc<MemoryChainContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub fn config() -> EngineConfig {
        EngineConfig {
            identity: IdentityConfig {
                mode: IdentityMode::Mock,
                webhook_secret: None,
            },
            ..EngineConfig::default()
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let chain_id = config.chain.chain_id;
        Self::with_signer_on(config, chain_id)
    }

    /// Signer starts on `signer_chain`, which is the only chain it knows.
    pub fn with_signer_on(config: EngineConfig, signer_chain: u64) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let context = Arc::new(MemoryChainContext::new(signer_chain));
        let engine = AttestationEngine::new(&config, registry.clone(), context.clone())
            .expect("engine config is valid");
        Self {
            engine,
            registry,
            context,
        }
    }

    /// Verified identity plus configured secrets.
    pub fn onboard(&self, name: &str, holder: &str) -> (OwnerId, Credential) {
        let owner = OwnerId::new(name).expect("valid owner id");
        let credential = self.verify_identity(&owner, holder);
        self.engine
            .configure_failsafe(&owner, PRIMARY, DURESS)
            .expect("secrets meet policy");
        (owner, credential)
    }

    pub fn verify_identity(&self, owner: &OwnerId, holder: &str) -> Credential {
        let event = IdentityVerifiedEvent::approved(
            owner.clone(),
            ChainAddress::parse(holder).expect("valid holder address"),
        );
        let body = serde_json::to_vec(&event).expect("event serializes");
        self.engine
            .identity_verified(&body, None)
            .expect("identity event accepted")
            .expect("approval grants a credential")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub const HOLDER_A: &str = "0x00000000000000000000000000000000000000aa";
pub const HOLDER_B: &str = "0x00000000000000000000000000000000000000bb";
