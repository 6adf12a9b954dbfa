//! CLI Command Implementations

pub mod hash;
pub mod sign;
pub mod simulate;
pub mod verify;

use anyhow::{Context, Result};
use std::{fs, path::Path};

/// Read a file and parse it as JSON
pub fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse JSON in {}", path.display()))
}

/// SHA-256 of a file's contents as `0x`-hex
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(munus_escrow::attestation::sha256_hex(&bytes))
}
