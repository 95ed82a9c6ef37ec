//! `blocktrust failsafe`: duress failsafe management.

use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};

use super::{NodeClient, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct FailsafeArgs {
    #[command(subcommand)]
    pub command: FailsafeCommand,

    /// API endpoint of the node.
    #[arg(short, long, global = true, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Subcommand, Debug)]
pub enum FailsafeCommand {
    /// Register the primary and duress secrets.
    Configure {
        #[arg(short, long)]
        owner: String,
        #[arg(long)]
        primary: String,
        #[arg(long)]
        duress: String,
    },
    /// Present a secret to the failsafe directly.
    Trigger {
        #[arg(short, long)]
        owner: String,
        #[arg(short, long)]
        secret: String,
        /// Digest to place in the decoy attestation.
        #[arg(short, long)]
        digest: String,
        #[arg(short, long)]
        algorithm: Option<String>,
    },
    /// Show whether the failsafe is configured and when it last fired.
    Status {
        #[arg(short, long)]
        owner: String,
    },
}

#[derive(Serialize)]
struct ConfigureRequest<'a> {
    owner_id: &'a str,
    primary_secret: &'a str,
    duress_secret: &'a str,
}

#[derive(Serialize)]
struct TriggerRequest<'a> {
    owner_id: &'a str,
    presented_secret: &'a str,
    digest: &'a str,
    algorithm: Option<&'a str>,
}

#[derive(Deserialize)]
struct StatusResponse {
    configured: bool,
    last_trigger: Option<String>,
    #[serde(default)]
    last_invalidation: Option<serde_json::Value>,
}

pub async fn run(args: &FailsafeArgs) -> anyhow::Result<()> {
    let client = NodeClient::new(&args.endpoint);
    match &args.command {
        FailsafeCommand::Configure {
            owner,
            primary,
            duress,
        } => {
            let _: serde_json::Value = client
                .post(
                    "/api/v1/failsafe/configure",
                    &ConfigureRequest {
                        owner_id: owner,
                        primary_secret: primary,
                        duress_secret: duress,
                    },
                )
                .await?;
            println!("Failsafe configured for {}", owner);
        }
        FailsafeCommand::Trigger {
            owner,
            secret,
            digest,
            algorithm,
        } => {
            let outcome: serde_json::Value = client
                .post(
                    "/api/v1/failsafe/trigger",
                    &TriggerRequest {
                        owner_id: owner,
                        presented_secret: secret,
                        digest,
                        algorithm: algorithm.as_deref(),
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if outcome["invalidation_outcome"]["status"] == "failed" {
                anyhow::bail!("failsafe ran but the credential was not invalidated");
            }
        }
        FailsafeCommand::Status { owner } => {
            let status: StatusResponse = client.get(&format!("/api/v1/failsafe/{}", owner)).await?;
            println!("Owner:        {}", owner);
            println!("Configured:   {}", status.configured);
            println!(
                "Last trigger: {}",
                status.last_trigger.as_deref().unwrap_or("never")
            );
            if let Some(invalidation) = &status.last_invalidation {
                println!(
                    "Invalidation: {}",
                    invalidation["status"].as_str().unwrap_or("unknown")
                );
            }
        }
    }
    Ok(())
}
