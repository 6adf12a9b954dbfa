//! Layered configuration
//!
//! Defaults, then an optional file, then `MUNUS_*` environment variables.
//! Nested keys use a double underscore, e.g. `MUNUS_VERIFIER__STALE_AFTER_SECS`.

use crate::{attestation::VerifierConfig, ledger::LedgerConfig, notifier::NotifierConfig, EscrowResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level configuration for a Munus node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MunusConfig {
    pub ledger: LedgerConfig,
    pub verifier: VerifierConfig,
    pub notifier: NotifierConfig,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for MunusConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            verifier: VerifierConfig::default(),
            notifier: NotifierConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl MunusConfig {
    /// Load configuration, layering `path` (if it exists) and the environment
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix("MUNUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(loaded)
    }
}
