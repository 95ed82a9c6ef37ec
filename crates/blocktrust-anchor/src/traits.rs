use async_trait::async_trait;
use blocktrust_core::{ChainParams, ChainTxRef, Digest};

use crate::error::{ContextError, RegistryError};
use crate::types::{AnchorReceipt, AnchorRecord, AnchorRequest};

/// The active signer's view of which chain it is connected to.
///
/// Implementations bridge to a wallet or a signing RPC endpoint.
#[async_trait]
pub trait ChainContext: Send + Sync {
    async fn current_chain_id(&self) -> Result<u64, ContextError>;

    /// Ask the signer to switch. Fails with `UnrecognizedChain` when the chain
    /// has never been registered with the signer.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), ContextError>;

    /// Register a chain with the signer using its public parameters.
    async fn add_chain(&self, params: &ChainParams) -> Result<(), ContextError>;
}

/// The on-chain proof registry.
#[async_trait]
pub trait AnchorRegistry: Send + Sync {
    /// Send one anchoring transaction and wait for it to be mined.
    async fn anchor(&self, request: &AnchorRequest) -> Result<AnchorReceipt, RegistryError>;

    /// Find an anchor already mined for this digest and credential commitment.
    async fn lookup_anchor(
        &self,
        digest: &Digest,
        credential_commitment: &[u8; 32],
    ) -> Result<Option<AnchorRecord>, RegistryError>;

    /// Read the anchor recorded by a transaction, if any.
    async fn resolve(&self, tx_ref: &ChainTxRef) -> Result<Option<AnchorRecord>, RegistryError>;

    /// Short identifier used in logs (e.g. "memory", "rpc:137").
    fn registry_id(&self) -> &str;
}
