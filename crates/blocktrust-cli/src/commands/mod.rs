pub mod attest;
pub mod credential;
pub mod failsafe;
pub mod hash;
pub mod verify;

use blocktrust_core::ErrorBody;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9101";

/// Thin JSON client for the node API.
pub struct NodeClient {
    endpoint: String,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self
            .http
            .get(format!("{}{}", self.endpoint, path))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("could not reach node at {}: {}", self.endpoint, e))?;
        Self::decode(resp).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        let resp = self
            .http
            .post(format!("{}{}", self.endpoint, path))
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("could not reach node at {}: {}", self.endpoint, e))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        match resp.json::<ErrorBody>().await {
            Ok(err) => anyhow::bail!("{:?} (HTTP {}): {}", err.code, status, err.message),
            Err(_) => anyhow::bail!("request failed (HTTP {})", status),
        }
    }
}
