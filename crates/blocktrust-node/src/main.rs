//! Blocktrust node: entry point.
//!
//! Starts the attestation node with configuration from a TOML file or defaults.

use blocktrust_core::IdentityMode;
use blocktrust_node::{BlocktrustNode, NodeConfig};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IdentityModeArg {
    Live,
    Mock,
}

/// Blocktrust attestation node
#[derive(Parser, Debug)]
#[command(name = "blocktrust-node", version, about = "Blocktrust attestation node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "blocktrust.toml")]
    config: PathBuf,

    /// Override the API port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the expected chain id.
    #[arg(long)]
    chain_id: Option<u64>,

    /// Override how identity webhooks are authenticated.
    #[arg(long, value_enum)]
    identity_mode: Option<IdentityModeArg>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init {
        let config = NodeConfig::default();
        config.save(&args.config)?;
        println!("wrote default config to {}", args.config.display());
        return Ok(());
    }

    let mut config = NodeConfig::load(&args.config)?;

    // Apply CLI overrides
    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(chain_id) = args.chain_id {
        config.engine.chain.chain_id = chain_id;
    }
    if let Some(mode) = args.identity_mode {
        config.engine.identity.mode = match mode {
            IdentityModeArg::Live => IdentityMode::Live,
            IdentityModeArg::Mock => IdentityMode::Mock,
        };
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.format = "json".into();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    tracing::info!("Blocktrust node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = BlocktrustNode::new(config)?;
    node.start().await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "event loop error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("Blocktrust node exited cleanly");
    Ok(())
}
