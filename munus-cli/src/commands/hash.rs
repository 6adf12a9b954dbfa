//! `munus hash` command implementation

use anyhow::Result;
use std::{path::PathBuf, process::ExitCode};

pub fn run(file: PathBuf) -> Result<ExitCode> {
    println!("{}", super::hash_file(&file)?);
    Ok(ExitCode::SUCCESS)
}
