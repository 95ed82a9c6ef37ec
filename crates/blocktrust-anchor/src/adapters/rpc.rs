//! # JSON-RPC Proof Registry
//!
//! Anchors digests on an EVM-compatible chain by calling the registry
//! contract's `storeProof(bytes32 digest, bytes32 credentialCommitment)`
//! through `eth_sendTransaction`. The RPC endpoint signs on behalf of the
//! holder address; this adapter never holds private keys.
//!
//! The contract emits
//! `ProofStored(bytes32 indexed digest, bytes32 indexed commitment, address indexed signer)`,
//! which is how anchors are found again (`eth_getLogs`) and resolved from a
//! transaction hash (`eth_getTransactionReceipt`).
//!
//! The same endpoint doubles as the [`ChainContext`]: `eth_chainId`,
//! `wallet_switchEthereumChain` and `wallet_addEthereumChain`.

use async_trait::async_trait;
use blocktrust_core::{ChainAddress, ChainParams, ChainTxRef, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha3::{Digest as _, Keccak256};
use std::time::Duration;

use crate::error::{ContextError, RegistryError, RejectionReason};
use crate::traits::{AnchorRegistry, ChainContext};
use crate::types::{AnchorReceipt, AnchorRecord, AnchorRequest};

const STORE_PROOF_SIGNATURE: &str = "storeProof(bytes32,bytes32)";
const PROOF_STORED_EVENT: &str = "ProofStored(bytes32,bytes32,address)";

/// Wallet error code for an unknown chain.
const UNRECOGNIZED_CHAIN: i64 = 4902;
/// Wallet error code for a request the user declined.
const USER_REJECTED: i64 = 4001;
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub rpc_url: String,
    /// Address of the proof registry contract.
    pub contract_address: ChainAddress,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How many times to poll for a receipt before reporting the send as pending.
    #[serde(default = "default_receipt_polls")]
    pub receipt_polls: u32,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_receipt_polls() -> u32 {
    20
}
fn default_receipt_poll_interval_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RpcFault {
    Transport(String),
    Rpc { code: i64, message: String },
    Malformed(String),
}

impl std::fmt::Display for RpcFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {}", msg),
            Self::Rpc { code, message } => write!(f, "rpc error {}: {}", code, message),
            Self::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

#[derive(Debug)]
pub struct RpcAdapter {
    client: reqwest::Client,
    config: RpcConfig,
    id: String,
}

impl RpcAdapter {
    pub fn new(config: RpcConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let id = format!("rpc:{}", config.rpc_url);
        Ok(Self { client, config, id })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcFault> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcFault::Transport("request timed out".into())
                } else {
                    RpcFault::Transport(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(RpcFault::Transport(format!("HTTP {}", resp.status())));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| RpcFault::Malformed(format!("invalid JSON: {}", e)))?;

        if let Some(error) = json.get("error") {
            return Err(RpcFault::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown RPC error")
                    .to_string(),
            });
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| RpcFault::Malformed("missing 'result' field".into()))
    }

    async fn block_timestamp(&self, block_number: &str) -> Result<DateTime<Utc>, RpcFault> {
        let block = self
            .call("eth_getBlockByNumber", json!([block_number, false]))
            .await?;
        let secs = block
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
            .ok_or_else(|| RpcFault::Malformed("block without timestamp".into()))?;
        DateTime::from_timestamp(secs as i64, 0)
            .ok_or_else(|| RpcFault::Malformed(format!("timestamp out of range: {}", secs)))
    }

    async fn record_from_log(&self, log: &Value) -> Result<AnchorRecord, RpcFault> {
        let fields = decode_proof_log(log)?;
        let anchored_at = self.block_timestamp(&fields.block_number).await?;
        Ok(AnchorRecord {
            tx_ref: fields.tx_ref,
            digest: fields.digest,
            signer: fields.signer,
            credential_commitment: fields.commitment,
            anchored_at,
        })
    }

    async fn wait_for_receipt(&self, tx_ref: &ChainTxRef) -> Result<Option<Value>, RpcFault> {
        for poll in 0..self.config.receipt_polls.max(1) {
            if poll > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.receipt_poll_interval_ms))
                    .await;
            }
            let receipt = self
                .call("eth_getTransactionReceipt", json!([tx_ref.as_str()]))
                .await?;
            if !receipt.is_null() {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    fn proof_log<'a>(&self, receipt: &'a Value) -> Option<&'a Value> {
        let topic0 = hex32(&keccak(PROOF_STORED_EVENT.as_bytes()));
        receipt
            .get("logs")
            .and_then(Value::as_array)?
            .iter()
            .find(|log| {
                let address_matches = log
                    .get("address")
                    .and_then(Value::as_str)
                    .map(|a| a.eq_ignore_ascii_case(self.config.contract_address.as_str()))
                    .unwrap_or(false);
                let topic_matches = log
                    .get("topics")
                    .and_then(|t| t.get(0))
                    .and_then(Value::as_str)
                    .map(|t| t.eq_ignore_ascii_case(&topic0))
                    .unwrap_or(false);
                address_matches && topic_matches
            })
    }
}

#[async_trait]
impl AnchorRegistry for RpcAdapter {
    async fn anchor(&self, request: &AnchorRequest) -> Result<AnchorReceipt, RegistryError> {
        let tx = json!({
            "from": request.signer.as_str(),
            "to": self.config.contract_address.as_str(),
            "data": encode_store_proof(request.digest.as_bytes(), &request.credential_commitment),
        });

        let hash = self
            .call("eth_sendTransaction", json!([tx]))
            .await
            .map_err(classify_fault)?;
        let tx_ref = hash
            .as_str()
            .and_then(|s| ChainTxRef::parse(s).ok())
            .ok_or_else(|| RegistryError::Transient("eth_sendTransaction returned no hash".into()))?;

        // From here on the transaction exists; every failure reports the hash
        // so the caller polls it instead of sending again.
        let receipt = match self.wait_for_receipt(&tx_ref).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => return Err(RegistryError::Pending(tx_ref)),
            Err(fault) => {
                tracing::warn!(%tx_ref, error = %fault, "receipt poll failed after send");
                return Err(RegistryError::Pending(tx_ref));
            }
        };

        if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
            return Err(RegistryError::Definitive(RejectionReason::Reverted(format!(
                "transaction {} failed with status 0x0",
                tx_ref
            ))));
        }

        let Some(block_number) = receipt.get("blockNumber").and_then(Value::as_str) else {
            return Err(RegistryError::Pending(tx_ref));
        };
        let anchored_at = match self.block_timestamp(block_number).await {
            Ok(at) => at,
            Err(fault) => {
                tracing::warn!(%tx_ref, error = %fault, "block lookup failed after mining");
                return Err(RegistryError::Pending(tx_ref));
            }
        };

        Ok(AnchorReceipt {
            tx_ref,
            anchored_at,
        })
    }

    async fn lookup_anchor(
        &self,
        digest: &Digest,
        credential_commitment: &[u8; 32],
    ) -> Result<Option<AnchorRecord>, RegistryError> {
        let filter = json!({
            "address": self.config.contract_address.as_str(),
            "fromBlock": "earliest",
            "toBlock": "latest",
            "topics": [
                hex32(&keccak(PROOF_STORED_EVENT.as_bytes())),
                hex32(digest.as_bytes()),
                hex32(credential_commitment),
            ],
        });
        let logs = self
            .call("eth_getLogs", json!([filter]))
            .await
            .map_err(|e| RegistryError::Transient(e.to_string()))?;

        match logs.as_array().and_then(|l| l.first()) {
            Some(log) => self
                .record_from_log(log)
                .await
                .map(Some)
                .map_err(|e| RegistryError::Transient(e.to_string())),
            None => Ok(None),
        }
    }

    async fn resolve(&self, tx_ref: &ChainTxRef) -> Result<Option<AnchorRecord>, RegistryError> {
        let receipt = self
            .call("eth_getTransactionReceipt", json!([tx_ref.as_str()]))
            .await
            .map_err(|e| RegistryError::Transient(e.to_string()))?;
        if receipt.is_null() {
            return Ok(None);
        }
        match self.proof_log(&receipt) {
            Some(log) => self
                .record_from_log(log)
                .await
                .map(Some)
                .map_err(|e| RegistryError::Transient(e.to_string())),
            None => Ok(None),
        }
    }

    fn registry_id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl ChainContext for RpcAdapter {
    async fn current_chain_id(&self) -> Result<u64, ContextError> {
        let result = self
            .call("eth_chainId", json!([]))
            .await
            .map_err(context_error)?;
        result
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| ContextError::Unavailable("eth_chainId returned no chain id".into()))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ContextError> {
        self.call(
            "wallet_switchEthereumChain",
            json!([{ "chainId": format!("{:#x}", chain_id) }]),
        )
        .await
        .map(|_| ())
        .map_err(|fault| match fault {
            RpcFault::Rpc { code, .. } if code == UNRECOGNIZED_CHAIN => {
                ContextError::UnrecognizedChain(chain_id)
            }
            other => context_error(other),
        })
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), ContextError> {
        let body = json!([{
            "chainId": params.chain_id_hex(),
            "chainName": params.chain_name,
            "nativeCurrency": {
                "name": params.native_currency.name,
                "symbol": params.native_currency.symbol,
                "decimals": params.native_currency.decimals,
            },
            "rpcUrls": params.rpc_urls,
            "blockExplorerUrls": params.block_explorer_urls,
        }]);
        self.call("wallet_addEthereumChain", body)
            .await
            .map(|_| ())
            .map_err(context_error)
    }
}

fn keccak(bytes: &[u8]) -> [u8; 32] {
    Keccak256::digest(bytes).into()
}

fn selector(signature: &str) -> [u8; 4] {
    let h = keccak(signature.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

fn hex32(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn parse_topic(topic: Option<&Value>) -> Result<[u8; 32], RpcFault> {
    let raw = topic
        .and_then(Value::as_str)
        .ok_or_else(|| RpcFault::Malformed("log topic missing".into()))?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(raw.trim_start_matches("0x"), &mut out)
        .map_err(|e| RpcFault::Malformed(format!("bad topic: {}", e)))?;
    Ok(out)
}

/// ABI calldata: selector, then the two 32-byte words.
fn encode_store_proof(digest: &[u8; 32], commitment: &[u8; 32]) -> String {
    format!(
        "0x{}{}{}",
        hex::encode(selector(STORE_PROOF_SIGNATURE)),
        hex::encode(digest),
        hex::encode(commitment)
    )
}

struct ProofLogFields {
    tx_ref: ChainTxRef,
    digest: [u8; 32],
    commitment: [u8; 32],
    signer: ChainAddress,
    block_number: String,
}

fn decode_proof_log(log: &Value) -> Result<ProofLogFields, RpcFault> {
    let topics = log
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| RpcFault::Malformed("log without topics".into()))?;
    let digest = parse_topic(topics.get(1))?;
    let commitment = parse_topic(topics.get(2))?;
    let signer_word = parse_topic(topics.get(3))?;
    let signer = ChainAddress::parse(&hex::encode(&signer_word[12..]))
        .map_err(|e| RpcFault::Malformed(e.to_string()))?;
    let tx_ref = log
        .get("transactionHash")
        .and_then(Value::as_str)
        .and_then(|s| ChainTxRef::parse(s).ok())
        .ok_or_else(|| RpcFault::Malformed("log without transaction hash".into()))?;
    let block_number = log
        .get("blockNumber")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcFault::Malformed("log without block number".into()))?
        .to_string();
    Ok(ProofLogFields {
        tx_ref,
        digest,
        commitment,
        signer,
        block_number,
    })
}

/// Sort a send failure into retryable or final.
fn classify_fault(fault: RpcFault) -> RegistryError {
    match fault {
        RpcFault::Rpc { code, message } => {
            let lower = message.to_ascii_lowercase();
            if code == USER_REJECTED || lower.contains("user rejected") || lower.contains("user denied") {
                RegistryError::Definitive(RejectionReason::SignerDeclined)
            } else if lower.contains("insufficient funds") {
                RegistryError::Definitive(RejectionReason::InsufficientFunds)
            } else if lower.contains("execution reverted") {
                RegistryError::Definitive(RejectionReason::Reverted(message))
            } else {
                RegistryError::Transient(format!("rpc error {}: {}", code, message))
            }
        }
        other => RegistryError::Transient(other.to_string()),
    }
}

fn context_error(fault: RpcFault) -> ContextError {
    match fault {
        RpcFault::Rpc { code, message } if code == USER_REJECTED => ContextError::Rejected(message),
        RpcFault::Rpc { code, .. } if code == METHOD_NOT_FOUND => {
            ContextError::Rejected("signer does not support chain management".into())
        }
        RpcFault::Rpc { code, message } => {
            ContextError::Rejected(format!("rpc error {}: {}", code, message))
        }
        other => ContextError::Unavailable(other.to_string()),
    }
}
