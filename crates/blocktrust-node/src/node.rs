//! Node lifecycle: adapter selection, API server, event logging.

use anyhow::Result;
use blocktrust_anchor::adapters::{MemoryChainContext, MemoryRegistry, RpcAdapter};
use blocktrust_anchor::{AnchorRegistry, ChainContext};
use blocktrust_core::{EngineEvent, Subscription};
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::engine::AttestationEngine;
use crate::state::NodeState;

pub struct BlocktrustNode {
    config: NodeConfig,
    engine: Arc<AttestationEngine>,
    state: Option<Arc<NodeState>>,
    events: Option<Subscription>,
}

impl BlocktrustNode {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let (registry, context): (Arc<dyn AnchorRegistry>, Arc<dyn ChainContext>) =
            match &config.anchor.rpc {
                Some(rpc) => {
                    tracing::info!(rpc_url = %rpc.rpc_url, contract = %rpc.contract_address, "using JSON-RPC anchor registry");
                    let adapter = Arc::new(RpcAdapter::new(rpc.clone())?);
                    let registry: Arc<dyn AnchorRegistry> = adapter.clone();
                    let context: Arc<dyn ChainContext> = adapter;
                    (registry, context)
                }
                None => {
                    tracing::warn!("no [anchor.rpc] section, anchoring to an in-memory registry");
                    let registry: Arc<dyn AnchorRegistry> = Arc::new(MemoryRegistry::new());
                    let context: Arc<dyn ChainContext> =
                        Arc::new(MemoryChainContext::new(config.engine.chain.chain_id));
                    (registry, context)
                }
            };

        let engine = AttestationEngine::new(&config.engine, registry, context)?;
        Ok(Self {
            config,
            engine: Arc::new(engine),
            state: None,
            events: None,
        })
    }

    pub fn engine(&self) -> &Arc<AttestationEngine> {
        &self.engine
    }

    /// Subscribe to engine events and spawn the HTTP API server.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(chain_id = self.config.engine.chain.chain_id, "starting attestation node");

        self.events = Some(self.engine.events().subscribe()?);

        let state = Arc::new(NodeState::new(Arc::clone(&self.engine)));
        let api_addr = self.config.api_addr()?;
        let api_state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = crate::api::start_api_server(api_addr, api_state).await {
                tracing::error!(error = %e, "HTTP API server error");
            }
        });

        self.state = Some(state);
        Ok(())
    }

    /// Log engine events until the bus closes.
    pub async fn run(&mut self) -> Result<()> {
        let Some(events) = self.events.as_mut() else {
            anyhow::bail!("node not started");
        };
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down attestation node");
        self.engine.shutdown();
        if let Some(events) = self.events.take() {
            self.engine.events().unsubscribe(events.id());
        }
        self.state = None;
        Ok(())
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::AttestationAnchored {
            digest,
            chain_tx_ref,
            credential_ref,
        } => tracing::info!(target: "blocktrust::events", %digest, %chain_tx_ref, %credential_ref, "attestation anchored"),
        EngineEvent::SubmissionAttemptFailed {
            digest,
            attempt,
            reason,
        } => tracing::warn!(target: "blocktrust::events", %digest, attempt, %reason, "submission attempt failed"),
        EngineEvent::NetworkSwitched {
            from_chain_id,
            to_chain_id,
        } => tracing::info!(target: "blocktrust::events", from_chain_id, to_chain_id, "signer switched network"),
        EngineEvent::CredentialActivated { credential_ref } => {
            tracing::info!(target: "blocktrust::events", %credential_ref, "credential activated")
        }
        EngineEvent::CredentialInvalidated {
            credential_ref,
            cause,
        } => tracing::info!(target: "blocktrust::events", %credential_ref, %cause, "credential invalidated"),
        // Logged at the source; repeated here without the owner.
        EngineEvent::FailsafeTriggered { invalidated, .. } => {
            tracing::debug!(target: "blocktrust::events", invalidated, "failsafe event")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocktrust_core::IdentityMode;

    fn dev_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.engine.identity.mode = IdentityMode::Mock;
        config.api.port = 0;
        config
    }

    #[test]
    fn test_live_identity_without_secret_fails() {
        let err = BlocktrustNode::new(NodeConfig::default()).err().unwrap();
        assert!(err.to_string().contains("webhook secret"));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut node = BlocktrustNode::new(dev_config()).unwrap();
        node.start().await.unwrap();
        assert_eq!(node.engine().events().listener_count(), 1);
        node.shutdown().await.unwrap();
        assert_eq!(node.engine().events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_run_requires_start() {
        let mut node = BlocktrustNode::new(dev_config()).unwrap();
        assert!(node.run().await.is_err());
    }
}
