//! Munus CLI - escrow and attestation tooling
//!
//! Operator-side commands: check a worker's attestation before releasing
//! funds, sign claims as a worker, hash artifacts, and walk a job through
//! its lifecycle against an in-memory ledger.

use anyhow::Result;
use clap::{Parser, Subcommand};
use munus_escrow::config::MunusConfig;
use std::{path::PathBuf, process::ExitCode};
use tracing_subscriber::EnvFilter;

mod commands;

/// Munus: escrowed paid work with attested delivery
#[derive(Parser)]
#[command(name = "munus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, env = "MUNUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a worker attestation (exit code 1 when invalid)
    Verify {
        /// Attestation file (JSON)
        claim: PathBuf,

        /// Outputs file (JSON) carrying the expected `outputHash`
        #[arg(conflicts_with_all = ["expected_output", "output_file"])]
        outputs: Option<PathBuf>,

        /// Expected output hash
        #[arg(long, conflicts_with = "output_file")]
        expected_output: Option<String>,

        /// Artifact whose SHA-256 is the expected output hash
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Verify as of this unix time instead of now
        #[arg(long)]
        now: Option<u64>,

        /// Output format (json, human)
        #[arg(short, long, default_value = "human")]
        format: String,
    },

    /// Sign an attestation with a worker key
    Sign {
        /// Worker secret key seed (32 bytes, hex)
        #[arg(short, long, env = "MUNUS_WORKER_KEY", hide_env_values = true)]
        key: String,

        /// Job the work was done for
        #[arg(long)]
        job_id: u64,

        /// Hash of the job input
        #[arg(long)]
        input_hash: String,

        /// Hash of the produced output
        #[arg(long, conflicts_with = "output_file")]
        output_hash: Option<String>,

        /// Artifact to hash for the output hash
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Signing time (defaults to now)
        #[arg(long)]
        timestamp: Option<u64>,

        /// Worker address to include in the document
        #[arg(long)]
        worker_address: Option<String>,

        /// Write the attestation here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the SHA-256 of a file as 0x-hex
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Run a job through its lifecycle on an in-memory ledger
    Simulate {
        /// Job amount in the smallest token unit
        #[arg(long, default_value_t = 100_000_000_000_000_000)]
        amount: u128,

        /// Seconds until the job deadline
        #[arg(long, default_value_t = 3600)]
        window: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = MunusConfig::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Verify {
            claim,
            outputs,
            expected_output,
            output_file,
            now,
            format,
        } => {
            let expected = commands::verify::Expected::from_args(outputs, expected_output, output_file);
            commands::verify::run(claim, expected, now, format, config)
        }
        Commands::Sign {
            key,
            job_id,
            input_hash,
            output_hash,
            output_file,
            timestamp,
            worker_address,
            output,
        } => commands::sign::run(commands::sign::SignArgs {
            key,
            job_id,
            input_hash,
            output_hash,
            output_file,
            timestamp,
            worker_address,
            output,
        }),
        Commands::Hash { file } => commands::hash::run(file),
        Commands::Simulate { amount, window } => commands::simulate::run(amount, window, config).await,
    }
}
