use blocktrust_core::{ChainConfig, EngineEvent, EventBus};
use std::sync::Arc;

use crate::error::{AnchorError, ContextError};
use crate::traits::ChainContext;

/// Confirms the signer is on the expected chain before any anchoring call.
///
/// A mismatch triggers one remediation: a switch request, followed by a
/// registration with known chain parameters when the signer does not know the
/// chain. The context is re-read afterwards and only an exact match passes.
pub struct NetworkContextGuard {
    context: Arc<dyn ChainContext>,
    chains: ChainConfig,
    events: Option<Arc<EventBus>>,
}

impl NetworkContextGuard {
    pub fn new(context: Arc<dyn ChainContext>, chains: ChainConfig) -> Self {
        Self {
            context,
            chains,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn expected_chain_id(&self) -> u64 {
        self.chains.chain_id
    }

    pub async fn ensure_context(&self, expected: u64) -> Result<(), AnchorError> {
        let current = self
            .context
            .current_chain_id()
            .await
            .map_err(|e| wrong_network(expected, None, e))?;

        if current == expected {
            return Ok(());
        }

        tracing::info!(
            current_chain = current,
            expected_chain = expected,
            "signer on wrong chain, requesting switch"
        );

        match self.context.switch_chain(expected).await {
            Ok(()) => {}
            Err(ContextError::UnrecognizedChain(_)) => self.register(expected).await?,
            Err(e) => return Err(wrong_network(expected, Some(current), e)),
        }

        let after = self
            .context
            .current_chain_id()
            .await
            .map_err(|e| wrong_network(expected, None, e))?;
        if after != expected {
            return Err(AnchorError::WrongNetwork {
                expected,
                actual: Some(after),
                reason: "signer did not switch to the expected chain".into(),
            });
        }

        tracing::info!(from_chain = current, to_chain = expected, "signer switched chain");
        if let Some(events) = &self.events {
            events.publish(EngineEvent::NetworkSwitched {
                from_chain_id: current,
                to_chain_id: expected,
            });
        }
        Ok(())
    }

    /// Register the chain with the signer, then switch to it.
    async fn register(&self, chain_id: u64) -> Result<(), AnchorError> {
        let params = self
            .chains
            .params_for(chain_id)
            .ok_or_else(|| AnchorError::UnsupportedContext {
                chain_id,
                reason: "no registration parameters known for this chain".into(),
            })?;

        tracing::info!(chain_id, chain_name = %params.chain_name, "registering chain with signer");
        self.context
            .add_chain(&params)
            .await
            .map_err(|e| AnchorError::UnsupportedContext {
                chain_id,
                reason: format!("chain registration failed: {}", e),
            })?;

        // Some signers switch as part of registration.
        match self.context.current_chain_id().await {
            Ok(id) if id == chain_id => Ok(()),
            _ => self
                .context
                .switch_chain(chain_id)
                .await
                .map_err(|e| AnchorError::UnsupportedContext {
                    chain_id,
                    reason: format!("switch after registration failed: {}", e),
                }),
        }
    }
}

fn wrong_network(expected: u64, actual: Option<u64>, err: ContextError) -> AnchorError {
    AnchorError::WrongNetwork {
        expected,
        actual,
        reason: err.to_string(),
    }
}
