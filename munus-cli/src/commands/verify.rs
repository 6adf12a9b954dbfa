//! `munus verify` command implementation

use anyhow::{Context, Result};
use chrono::DateTime;
use munus_escrow::{
    attestation::{AttestationVerifier, Verification},
    clock::{Clock, SystemClock},
    config::MunusConfig,
};
use serde_json::{json, Value};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

/// Where the expected output hash comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    Unchecked,
    Literal(String),
    /// JSON file with an `outputHash` field
    OutputsFile(PathBuf),
    /// Artifact to hash
    Artifact(PathBuf),
}

impl Expected {
    pub fn from_args(
        outputs: Option<PathBuf>,
        literal: Option<String>,
        artifact: Option<PathBuf>,
    ) -> Self {
        match (outputs, literal, artifact) {
            (Some(path), _, _) => Self::OutputsFile(path),
            (_, Some(hash), _) => Self::Literal(hash),
            (_, _, Some(path)) => Self::Artifact(path),
            _ => Self::Unchecked,
        }
    }

    pub fn resolve(&self) -> Result<Option<String>> {
        match self {
            Self::Unchecked => Ok(None),
            Self::Literal(hash) => Ok(Some(hash.clone())),
            Self::OutputsFile(path) => {
                let outputs = super::read_json(path)?;
                let hash = outputs
                    .get("outputHash")
                    .and_then(Value::as_str)
                    .with_context(|| format!("{} has no outputHash", path.display()))?;
                Ok(Some(hash.to_string()))
            }
            Self::Artifact(path) => super::hash_file(path).map(Some),
        }
    }
}

fn iso_time(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}

fn field<'a>(document: &'a Value, name: &str) -> &'a str {
    document.get(name).and_then(Value::as_str).unwrap_or("N/A")
}

pub fn run(
    claim_path: PathBuf,
    expected: Expected,
    now: Option<u64>,
    format: String,
    config: MunusConfig,
) -> Result<ExitCode> {
    let document = super::read_json(&claim_path)?;
    let expected_output = expected.resolve()?;
    let now = now.unwrap_or_else(|| SystemClock.now());

    let verifier = AttestationVerifier::new(config.verifier);
    let verification = verifier.verify(&document, expected_output.as_deref(), now);

    if format == "json" {
        let report = json_report(&claim_path, &document, &verification);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human(&claim_path, &document, &verification);
    }

    Ok(if verification.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// Machine-readable report; valid claims carry the fields to submit with `deliver`
fn json_report(claim_path: &Path, document: &Value, verification: &Verification) -> Value {
    if !verification.is_valid() {
        return json!({ "verification": verification });
    }

    let output_hash = field(document, "outputHash");
    json!({
        "verification": verification,
        "jobId": document.get("jobId"),
        "outputHash": output_hash,
        "timestamp": document.get("timestamp"),
        "workerPublicKey": field(document, "workerPublicKey"),
        "workerAddress": document.get("workerAddress").and_then(Value::as_str),
        "submit": {
            "artifactHash": output_hash,
            "attestationCid": Value::Null,
            "attestationFile": claim_path.display().to_string(),
        },
    })
}

fn print_human(claim_path: &Path, document: &Value, verification: &Verification) {
    println!("Verifying attestation {}", claim_path.display());
    println!();

    match verification {
        Verification::Valid { advisories } => {
            let timestamp = document.get("timestamp").and_then(Value::as_u64).unwrap_or(0);
            let worker = document
                .get("workerAddress")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| {
                    let key: String = field(document, "workerPublicKey").chars().take(18).collect();
                    format!("with key {}...", key)
                });

            println!("ATTESTATION VALID");
            println!("  Job ID:      {}", document.get("jobId").and_then(Value::as_u64).unwrap_or(0));
            println!("  Worker:      {}", worker);
            println!("  Output hash: {}", field(document, "outputHash"));
            println!("  Signed at:   {}", iso_time(timestamp));
            for advisory in advisories {
                println!("  Warning:     {}", advisory);
            }
            println!();
            println!("Submit with deliver:");
            println!("  Artifact hash:   {}", field(document, "outputHash"));
            println!("  Attestation CID: (pin {} first)", claim_path.display());
        }
        Verification::Invalid { reason } => {
            println!("ATTESTATION INVALID ({})", reason.kind());
            println!("  {}", reason);
            println!();
            println!("Do not release funds on the strength of this attestation.");
        }
    }
}
