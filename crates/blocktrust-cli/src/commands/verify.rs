//! `blocktrust verify`: check both signatures of an attestation.

use blocktrust_core::CredentialRef;
use clap::Args;
use serde::{Deserialize, Serialize};

use super::{NodeClient, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[arg(short, long)]
    pub digest: String,

    /// Hash algorithm the digest was produced with.
    #[arg(short, long)]
    pub algorithm: Option<String>,

    /// Keyring signature, 128 hex characters.
    #[arg(short, long)]
    pub signature: String,

    /// Keyring key reference.
    #[arg(short, long)]
    pub key_ref: String,

    /// Anchoring transaction hash.
    #[arg(short, long)]
    pub tx: String,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    digest: &'a str,
    algorithm: Option<&'a str>,
    keyring_signature: &'a str,
    keyring_key_ref: &'a str,
    chain_tx_ref: &'a str,
}

#[derive(Deserialize)]
struct Check {
    name: String,
    passed: bool,
    detail: Option<String>,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
    credential_ref: Option<CredentialRef>,
    signed_at: Option<String>,
    checks: Vec<Check>,
}

pub async fn run(args: &VerifyArgs) -> anyhow::Result<()> {
    let body = VerifyRequest {
        digest: &args.digest,
        algorithm: args.algorithm.as_deref(),
        keyring_signature: &args.signature,
        keyring_key_ref: &args.key_ref,
        chain_tx_ref: &args.tx,
    };
    let report: VerifyResponse = NodeClient::new(&args.endpoint)
        .post("/api/v1/attestations/verify", &body)
        .await?;

    println!("Attestation is {}", if report.valid { "VALID" } else { "INVALID" });
    if let Some(cref) = &report.credential_ref {
        println!("  Credential: {}", cref);
    }
    if let Some(at) = &report.signed_at {
        println!("  Signed at:  {}", at);
    }
    for check in &report.checks {
        let mark = if check.passed { "ok  " } else { "FAIL" };
        match &check.detail {
            Some(detail) => println!("  [{}] {}: {}", mark, check.name, detail),
            None => println!("  [{}] {}", mark, check.name),
        }
    }
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}
