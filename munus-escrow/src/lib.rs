//! Escrow backend for paid work between untrusting parties
//!
//! This crate implements the two pieces of Munus that hold real invariants:
//! - An escrow ledger that custodies funds per job and enforces who may move
//!   a job through `Open -> Accepted -> Delivered -> Released` (or `Refunded`)
//! - An attestation verifier that checks an Ed25519-signed claim that a worker
//!   produced a given output for a given job input
//!
//! The two never call each other. An operator runs the verifier against the
//! delivered attestation before deciding to release funds on the ledger.

pub mod attestation;
pub mod bank;
pub mod clock;
pub mod config;
pub mod custody;
pub mod encoding;
pub mod error;
pub mod ledger;
pub mod models;
pub mod node;
pub mod notifier;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
