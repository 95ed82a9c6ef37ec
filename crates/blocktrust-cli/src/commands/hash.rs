//! `blocktrust hash` and `blocktrust normalize`: local digest tools.

use blocktrust_core::{Digest, HashAlgorithm};
use blocktrust_crypto::compute_digest;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct HashArgs {
    /// File to hash.
    pub file: PathBuf,

    /// content-hash (SHA-256) or chain-native-hash (Keccak-256).
    #[arg(short, long, default_value = "content-hash")]
    pub algorithm: HashAlgorithm,
}

#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// Hex digest, with or without 0x, any case.
    pub digest: String,

    #[arg(short, long, default_value = "content-hash")]
    pub algorithm: HashAlgorithm,
}

pub fn run_hash(args: &HashArgs) -> anyhow::Result<()> {
    let bytes = std::fs::read(&args.file)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", args.file.display(), e))?;
    let digest = compute_digest(&bytes, args.algorithm);
    println!("{}  {}", digest, args.file.display());
    Ok(())
}

pub fn run_normalize(args: &NormalizeArgs) -> anyhow::Result<()> {
    let digest = Digest::normalize(&args.digest, args.algorithm)?;
    println!("{}", digest);
    Ok(())
}
