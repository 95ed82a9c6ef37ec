//! `blocktrust credential`: inspect or revoke an owner's credential.

use blocktrust_core::Credential;
use clap::Args;
use serde::{Deserialize, Serialize};

use super::{NodeClient, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct CredentialArgs {
    pub owner: String,

    /// Revoke this version instead of showing the history.
    #[arg(long)]
    pub revoke: Option<u32>,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Deserialize)]
struct HistoryResponse {
    current: Option<Credential>,
    history: Vec<Credential>,
}

#[derive(Serialize)]
struct RevokeRequest {
    expected_version: u32,
}

pub async fn run(args: &CredentialArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.endpoint);

    if let Some(version) = args.revoke {
        let credential: Credential = client
            .post(
                &format!("/api/v1/credentials/{}/revoke", args.owner),
                &RevokeRequest {
                    expected_version: version,
                },
            )
            .await?;
        println!("Revoked {} ({})", credential.credential_ref(), credential.status);
        return Ok(());
    }

    let data: HistoryResponse = client
        .get(&format!("/api/v1/credentials/{}", args.owner))
        .await?;
    if let Some(current) = &data.current {
        println!("Current: v{} {} (holder {})", current.version, current.status, current.holder_address);
    }
    println!("History:");
    for c in &data.history {
        let cause = c
            .invalidation_cause
            .map(|cause| format!(" cause={}", cause))
            .unwrap_or_default();
        println!("  v{:<3} {:<12}{}", c.version, c.status.to_string(), cause);
    }
    Ok(())
}
