use blocktrust_core::{ChainAddress, ChainTxRef, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One anchoring call: record `digest` under `credential_commitment`, signed by `signer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRequest {
    pub digest: Digest,
    pub credential_commitment: [u8; 32],
    pub signer: ChainAddress,
}

/// What the registry returns once a transaction is mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub tx_ref: ChainTxRef,
    pub anchored_at: DateTime<Utc>,
}

/// An anchor as read back from the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub tx_ref: ChainTxRef,
    /// Raw 32 bytes; the chain does not record the algorithm tag.
    #[serde(with = "hex_bytes32")]
    pub digest: [u8; 32],
    pub signer: ChainAddress,
    #[serde(with = "hex_bytes32")]
    pub credential_commitment: [u8; 32],
    /// Block timestamp; treated as the signing time.
    pub anchored_at: DateTime<Utc>,
}

impl AnchorRecord {
    pub fn receipt(&self) -> AnchorReceipt {
        AnchorReceipt {
            tx_ref: self.tx_ref.clone(),
            anchored_at: self.anchored_at,
        }
    }
}

mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(d)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(raw.trim_start_matches("0x"), &mut out)
            .map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
