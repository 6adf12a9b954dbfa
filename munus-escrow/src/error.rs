//! Error types for the escrow system
//!
//! Every ledger rejection is caller-facing and synchronous. A rejected
//! operation leaves the job record and custody untouched, so none of these
//! are retry-safe without the caller first re-reading the job.

use crate::models::{Address, JobId, JobState};
use thiserror::Error;

/// Main error type for escrow operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// Job amount was zero
    #[error("Job amount must be greater than 0")]
    ZeroAmount,

    /// Deadline not strictly after the creation time
    #[error("Deadline {deadline} is not after current time {now}")]
    PastDeadline { deadline: u64, now: u64 },

    /// Wrong state for the requested transition
    #[error("Job {id} is {state}, cannot {action}")]
    InvalidState {
        id: JobId,
        state: JobState,
        action: &'static str,
    },

    /// Caller is not the job creator
    #[error("Caller {caller} is not the creator of job {id}")]
    NotCreator { id: JobId, caller: Address },

    /// Caller is not the job assignee
    #[error("Caller {caller} is not the assignee of job {id}")]
    NotAssignee { id: JobId, caller: Address },

    /// Creator tried to accept their own job
    #[error("Creator cannot accept their own job {id}")]
    CreatorCannotAccept { id: JobId },

    /// Attached value does not match the job amount
    #[error("Funding mismatch: expected {expected}, provided {provided}")]
    FundingMismatch { expected: u128, provided: u128 },

    /// Token transfer into or out of custody failed
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Refund requested before the deadline passed
    #[error("Deadline {deadline} not reached (now {now})")]
    DeadlineNotReached { deadline: u64, now: u64 },

    /// No job with this id
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EscrowError {
    /// Create a transfer failure
    pub fn transfer_failed<S: Into<String>>(msg: S) -> Self {
        Self::TransferFailed(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ZeroAmount => "ZeroAmount",
            Self::PastDeadline { .. } => "PastDeadline",
            Self::InvalidState { .. } => "InvalidState",
            Self::NotCreator { .. } => "NotCreator",
            Self::NotAssignee { .. } => "NotAssignee",
            Self::CreatorCannotAccept { .. } => "CreatorCannotAccept",
            Self::FundingMismatch { .. } => "FundingMismatch",
            Self::TransferFailed(_) => "TransferFailed",
            Self::DeadlineNotReached { .. } => "DeadlineNotReached",
            Self::NotFound(_) => "NotFound",
            Self::Config(_) => "Config",
            Self::Serialization(_) => "Serialization",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for EscrowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
