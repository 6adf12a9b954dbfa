//! `munus sign` command implementation

use anyhow::{bail, Context, Result};
use ed25519_dalek::SigningKey;
use munus_escrow::{
    attestation::sign_claim,
    clock::{Clock, SystemClock},
};
use std::{fs, path::PathBuf, process::ExitCode};
use tracing::info;

pub struct SignArgs {
    pub key: String,
    pub job_id: u64,
    pub input_hash: String,
    pub output_hash: Option<String>,
    pub output_file: Option<PathBuf>,
    pub timestamp: Option<u64>,
    pub worker_address: Option<String>,
    pub output: Option<PathBuf>,
}

/// Parse a 32-byte secret seed given as hex, with or without `0x`
pub fn parse_seed(text: &str) -> Result<SigningKey> {
    let digits = text.trim().trim_start_matches("0x");
    let bytes = hex::decode(digits).context("Worker key is not valid hex")?;
    let seed: [u8; 32] = match bytes.try_into() {
        Ok(seed) => seed,
        Err(bytes) => bail!("Worker key must be 32 bytes, got {}", bytes.len()),
    };
    Ok(SigningKey::from_bytes(&seed))
}

pub fn run(args: SignArgs) -> Result<ExitCode> {
    let signing_key = parse_seed(&args.key)?;

    let output_hash = match (args.output_hash, args.output_file) {
        (Some(hash), _) => hash,
        (None, Some(path)) => super::hash_file(&path)?,
        (None, None) => bail!("Provide --output-hash or --output-file"),
    };
    let timestamp = args.timestamp.unwrap_or_else(|| SystemClock.now());

    let mut document = sign_claim(&signing_key, args.job_id, &args.input_hash, &output_hash, timestamp);
    document.worker_address = args.worker_address;
    let json = serde_json::to_string_pretty(&document)?;

    match args.output {
        Some(path) => {
            fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Attestation for job {} written to {}", args.job_id, path.display());
        }
        None => println!("{}", json),
    }
    Ok(ExitCode::SUCCESS)
}
