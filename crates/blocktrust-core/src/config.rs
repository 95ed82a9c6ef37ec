use serde::{Deserialize, Serialize};

/// Engine-level configuration shared by every component.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub failsafe: FailsafeConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Which chain anchors attestations, plus registration parameters for chains
/// the engine does not know out of the box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Expected chain id for every anchoring call.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Extra chain parameters used when the signer has to register a chain.
    #[serde(default)]
    pub extra_chains: Vec<ChainParams>,
}

/// Parameters needed to register a chain with a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub block_explorer_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl ChainParams {
    /// Chain id as the `0x`-prefixed hex string wallets expect.
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    pub fn polygon_mainnet() -> Self {
        Self {
            chain_id: 137,
            chain_name: "Polygon Mainnet".into(),
            native_currency: NativeCurrency {
                name: "MATIC".into(),
                symbol: "MATIC".into(),
                decimals: 18,
            },
            rpc_urls: vec!["https://polygon-rpc.com/".into()],
            block_explorer_urls: vec!["https://polygonscan.com/".into()],
        }
    }

    pub fn polygon_amoy() -> Self {
        Self {
            chain_id: 80002,
            chain_name: "Polygon Amoy Testnet".into(),
            native_currency: NativeCurrency {
                name: "POL".into(),
                symbol: "POL".into(),
                decimals: 18,
            },
            rpc_urls: vec!["https://rpc-amoy.polygon.technology/".into()],
            block_explorer_urls: vec!["https://amoy.polygonscan.com/".into()],
        }
    }

    /// Chains whose registration parameters ship with the engine.
    pub fn well_known() -> Vec<Self> {
        vec![Self::polygon_mainnet(), Self::polygon_amoy()]
    }
}

impl ChainConfig {
    /// Look up registration parameters, preferring operator-supplied entries.
    pub fn params_for(&self, chain_id: u64) -> Option<ChainParams> {
        self.extra_chains
            .iter()
            .find(|p| p.chain_id == chain_id)
            .cloned()
            .or_else(|| {
                ChainParams::well_known()
                    .into_iter()
                    .find(|p| p.chain_id == chain_id)
            })
    }
}

/// Backoff policy for anchoring submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailsafeConfig {
    /// Minimum length for both the primary and the duress secret.
    #[serde(default = "default_min_secret_len")]
    pub min_secret_len: usize,
}

/// How identity-verification events are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Events must carry a valid HMAC over the payload.
    Live,
    /// Events are accepted unsigned. Development only.
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_mode")]
    pub mode: IdentityMode,
    /// Shared secret for the provider's webhook HMAC. Required in live mode.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_max_listeners")]
    pub max_listeners: usize,
    /// Per-listener buffer; events to a full listener are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            extra_chains: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            min_secret_len: default_min_secret_len(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: default_identity_mode(),
            webhook_secret: None,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_listeners: default_max_listeners(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_chain_id() -> u64 {
    137
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_min_secret_len() -> usize {
    8
}
fn default_identity_mode() -> IdentityMode {
    IdentityMode::Live
}
fn default_max_listeners() -> usize {
    16
}
fn default_channel_capacity() -> usize {
    64
}
