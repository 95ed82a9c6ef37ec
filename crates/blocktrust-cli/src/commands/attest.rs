//! `blocktrust attest`: sign and anchor a digest through a node.

use blocktrust_core::{AttestationView, HashAlgorithm};
use blocktrust_crypto::compute_digest;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use super::{NodeClient, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct AttestArgs {
    /// Owner whose credential backs the attestation.
    #[arg(short, long)]
    pub owner: String,

    /// The owner's secret.
    #[arg(short, long)]
    pub secret: String,

    /// Hex digest to attest.
    #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
    pub digest: Option<String>,

    /// Hash this file and attest its digest.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    #[arg(short, long, default_value = "content-hash")]
    pub algorithm: HashAlgorithm,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Serialize)]
struct AttestRequest {
    owner_id: String,
    secret: String,
    digest: String,
    algorithm: String,
}

pub async fn run(args: &AttestArgs) -> anyhow::Result<()> {
    let digest = match (&args.digest, &args.file) {
        (Some(digest), _) => digest.clone(),
        (None, Some(file)) => compute_digest(&std::fs::read(file)?, args.algorithm).to_hex(),
        (None, None) => anyhow::bail!("either --digest or --file is required"),
    };

    let body = AttestRequest {
        owner_id: args.owner.clone(),
        secret: args.secret.clone(),
        digest,
        algorithm: args.algorithm.as_str().to_string(),
    };
    let view: AttestationView = NodeClient::new(&args.endpoint)
        .post("/api/v1/attestations", &body)
        .await?;

    println!("Attestation anchored");
    println!("  Digest:      {} ({})", view.digest, view.digest.algorithm());
    println!("  Credential:  {}", view.credential_ref);
    println!("  Keyring key: {}", view.keyring_key_ref);
    println!("  Signature:   {}", view.keyring_signature.as_str());
    println!("  Chain tx:    {}", view.chain_tx_ref);
    println!("  Signed at:   {}", view.created_at.to_rfc3339());
    Ok(())
}
