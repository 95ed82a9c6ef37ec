//! Blocktrust CLI.
//!
//! Subcommands: hash, normalize, attest, verify, failsafe, credential.
//! `hash` and `normalize` run locally; the rest talk to a node.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Blocktrust: dual-signature document attestation.
#[derive(Parser, Debug)]
#[command(name = "blocktrust", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hash a file into a canonical digest.
    Hash(commands::hash::HashArgs),
    /// Normalize a hex digest into canonical form.
    Normalize(commands::hash::NormalizeArgs),
    /// Sign and anchor a digest.
    Attest(commands::attest::AttestArgs),
    /// Verify an attestation.
    Verify(commands::verify::VerifyArgs),
    /// Configure, trigger or inspect the duress failsafe.
    Failsafe(commands::failsafe::FailsafeArgs),
    /// Show or revoke an owner's credential.
    Credential(commands::credential::CredentialArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Hash(args) => commands::hash::run_hash(args),
        Commands::Normalize(args) => commands::hash::run_normalize(args),
        Commands::Attest(args) => commands::attest::run(args).await,
        Commands::Verify(args) => commands::verify::run(args).await,
        Commands::Failsafe(args) => commands::failsafe::run(args).await,
        Commands::Credential(args) => commands::credential::run(args).await,
    }
}
