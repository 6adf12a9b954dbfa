//! Core data models for the escrow system
//!
//! This module contains the job record, its state machine, the ledger
//! events, and the small value types shared by the ledger and the verifier.

use crate::{error::EscrowError, EscrowResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Job identifier, allocated sequentially from 0
pub type JobId = u64;

/// Identity of a party (account, wallet address, public key, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Asset held for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    /// The ledger's native currency
    Native,
    /// An external fungible-token contract
    External(Address),
}

impl Token {
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::External(contract) => write!(f, "token:{}", contract),
        }
    }
}

/// Opaque 32-byte commitment, rendered as `0x`-prefixed hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Hash32 {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| EscrowError::Serialization(format!("invalid hash hex: {}", e)))?;
        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            EscrowError::Serialization(format!("hash must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Job state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Funded and waiting for a worker
    Open,
    /// A worker has taken the job
    Accepted,
    /// Work delivered with an artifact commitment
    Delivered,
    /// Funds paid out by the creator
    Released,
    /// Funds returned after the deadline
    Refunded,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        Self::Open,
        Self::Accepted,
        Self::Delivered,
        Self::Released,
        Self::Refunded,
    ];

    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn can_deliver(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn can_release(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Delivered jobs have no refund path; the creator must adjudicate them.
    pub fn can_refund(&self) -> bool {
        matches!(self, Self::Open | Self::Accepted)
    }

    /// Whether funds for a job in this state are still in custody
    pub fn holds_funds(&self) -> bool {
        !self.is_terminal()
    }

    /// Position along the transition graph, used to check forward-only movement
    pub fn rank(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Accepted => 1,
            Self::Delivered => 2,
            Self::Released | Self::Refunded => 3,
        }
    }

    /// Check whether `self -> to` is an edge of the transition graph
    pub fn permits(&self, to: JobState) -> bool {
        matches!(
            (self, to),
            (Self::Open, Self::Accepted)
                | (Self::Accepted, Self::Delivered)
                | (Self::Delivered, Self::Released)
                | (Self::Open, Self::Refunded)
                | (Self::Accepted, Self::Refunded)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "Open",
            Self::Accepted => "Accepted",
            Self::Delivered => "Delivered",
            Self::Released => "Released",
            Self::Refunded => "Refunded",
        };
        f.write_str(name)
    }
}

/// Escrowed unit of paid work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub creator: Address,
    pub assignee: Option<Address>,
    pub token: Token,
    pub amount: u128,
    pub deadline: u64,
    pub state: JobState,
    pub metadata_cid: String,
    pub artifact_hash: Option<Hash32>,
    pub attestation_cid: Option<String>,
    pub created_at: u64,
}

impl Job {
    /// Create a new open job
    pub fn new(
        id: JobId,
        creator: Address,
        token: Token,
        amount: u128,
        deadline: u64,
        metadata_cid: String,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            creator,
            assignee: None,
            token,
            amount,
            deadline,
            state: JobState::Open,
            metadata_cid,
            artifact_hash: None,
            attestation_cid: None,
            created_at,
        }
    }

    /// Validate a state transition
    pub fn validate_transition(&self, to: JobState, action: &'static str) -> EscrowResult<()> {
        if self.state.permits(to) {
            Ok(())
        } else {
            Err(EscrowError::InvalidState {
                id: self.id,
                state: self.state,
                action,
            })
        }
    }

    /// Whether the refund window has opened
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.deadline
    }
}

/// Facts emitted by the ledger, one per successful transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum LedgerEvent {
    JobCreated {
        id: JobId,
        creator: Address,
        token: Token,
        amount: u128,
        deadline: u64,
        metadata_cid: String,
    },
    JobAccepted {
        id: JobId,
        assignee: Address,
    },
    JobDelivered {
        id: JobId,
        artifact_hash: Hash32,
        attestation_cid: String,
    },
    Released {
        id: JobId,
        to: Address,
        amount: u128,
    },
    Refunded {
        id: JobId,
        to: Address,
        amount: u128,
    },
}

impl LedgerEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobCreated { id, .. }
            | Self::JobAccepted { id, .. }
            | Self::JobDelivered { id, .. }
            | Self::Released { id, .. }
            | Self::Refunded { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "JobCreated",
            Self::JobAccepted { .. } => "JobAccepted",
            Self::JobDelivered { .. } => "JobDelivered",
            Self::Released { .. } => "Released",
            Self::Refunded { .. } => "Refunded",
        }
    }
}

/// Execution context of a single ledger call
///
/// Mirrors what an execution environment hands a transaction: the calling
/// identity, the native value attached to the call, and the current time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    pub caller: Address,
    pub value: u128,
    pub now: u64,
}

impl TxContext {
    pub fn new(caller: impl Into<Address>, now: u64) -> Self {
        Self {
            caller: caller.into(),
            value: 0,
            now,
        }
    }

    /// Attach native value to the call
    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }
}

/// Job creation request
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub token: Token,
    pub amount: u128,
    pub deadline: u64,
    pub metadata_cid: String,
}
