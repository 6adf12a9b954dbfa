//! Escrow Node - High-level API for the escrow system
//!
//! The node wires the ledger, the verifier, the notifier and a clock
//! together. Callers name themselves and the node supplies `now`. It also
//! offers `review_delivery`, the check an operator runs before releasing.

use crate::{
    attestation::{AttestationClaim, AttestationVerifier, Verification},
    bank::TokenBank,
    clock::Clock,
    config::MunusConfig,
    error::EscrowError,
    ledger::EscrowLedger,
    models::{Address, CreateJobRequest, Hash32, Job, JobId, JobState, LedgerEvent, Token, TxContext},
    notifier::{Notifier, Receipt},
    EscrowResult,
};
use serde::Serialize;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main escrow node that coordinates all components
pub struct EscrowNode {
    ledger: Arc<EscrowLedger>,
    verifier: AttestationVerifier,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
}

/// Verdict on a delivered job's attestation
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReview {
    pub job_id: JobId,
    pub state: JobState,
    /// Verifier outcome with the recorded artifact hash as the expected output
    pub verification: Verification,
    /// `jobId` the claim was signed for, when it could be read
    pub claimed_job_id: Option<u64>,
}

impl DeliveryReview {
    pub fn job_id_matches(&self) -> bool {
        self.claimed_job_id == Some(self.job_id)
    }

    /// Whether releasing the job is backed by a valid attestation
    pub fn is_releasable(&self) -> bool {
        self.state == JobState::Delivered && self.verification.is_valid() && self.job_id_matches()
    }
}

/// Ledger totals at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub jobs: u64,
    pub by_state: BTreeMap<String, u64>,
    pub custody: BTreeMap<String, u128>,
}

/// Node health status
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealth {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub timestamp: u64,
}

impl EscrowNode {
    /// Create a node over the given bank and clock
    pub fn new(config: MunusConfig, bank: Arc<dyn TokenBank>, clock: Arc<dyn Clock>) -> Self {
        info!("Initializing escrow node");

        let ledger = Arc::new(EscrowLedger::new(config.ledger, bank));
        let verifier = AttestationVerifier::new(config.verifier);
        let notifier = Notifier::new(config.notifier);

        Self {
            ledger,
            verifier,
            notifier,
            clock,
        }
    }

    pub fn ledger(&self) -> &Arc<EscrowLedger> {
        &self.ledger
    }

    pub fn verifier(&self) -> &AttestationVerifier {
        &self.verifier
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn context(&self, caller: &Address) -> TxContext {
        TxContext::new(caller.clone(), self.clock.now())
    }

    /// Create a job; `value` is the native amount attached to the call
    pub async fn create_job(
        &self,
        caller: &Address,
        value: u128,
        request: CreateJobRequest,
    ) -> EscrowResult<JobId> {
        let ctx = self.context(caller).with_value(value);
        self.ledger.create_job(&ctx, request).await
    }

    pub async fn accept(&self, caller: &Address, id: JobId) -> EscrowResult<Job> {
        self.ledger.accept(&self.context(caller), id).await
    }

    pub async fn deliver(
        &self,
        caller: &Address,
        id: JobId,
        artifact_hash: Hash32,
        attestation_cid: impl Into<String>,
    ) -> EscrowResult<Job> {
        self.ledger
            .deliver(&self.context(caller), id, artifact_hash, attestation_cid.into())
            .await
    }

    pub async fn release(&self, caller: &Address, id: JobId, to: Address) -> EscrowResult<Job> {
        self.ledger.release(&self.context(caller), id, to).await
    }

    pub async fn refund(&self, caller: &Address, id: JobId, to: Address) -> EscrowResult<Job> {
        self.ledger.refund(&self.context(caller), id, to).await
    }

    pub async fn get_job(&self, id: JobId) -> EscrowResult<Job> {
        self.ledger.get_job(id).await
    }

    /// Verify a delivered job's attestation against what the ledger recorded
    ///
    /// Read-only: the ledger is never touched, whatever the outcome.
    pub async fn review_delivery(&self, id: JobId, document: &Value) -> EscrowResult<DeliveryReview> {
        let job = self.ledger.get_job(id).await?;
        let artifact_hash = job.artifact_hash.ok_or(EscrowError::InvalidState {
            id,
            state: job.state,
            action: "review",
        })?;

        let verification =
            self.verifier
                .verify(document, Some(&artifact_hash.to_hex()), self.clock.now());
        let claimed_job_id = AttestationClaim::from_document(document)
            .ok()
            .map(|claim| claim.job_id);

        let review = DeliveryReview {
            job_id: id,
            state: job.state,
            verification,
            claimed_job_id,
        };
        if review.verification.is_valid() && !review.job_id_matches() {
            warn!(
                "Attestation for job {} was signed for job {:?}",
                id, review.claimed_job_id
            );
        }
        Ok(review)
    }

    /// Counts per state and custody per token
    pub async fn summary(&self) -> LedgerSummary {
        let custody = self
            .ledger
            .custody_snapshot()
            .await
            .into_iter()
            .map(|(token, amount)| (token.to_string(), amount))
            .collect();

        LedgerSummary {
            jobs: self.ledger.job_count().await,
            by_state: self.ledger.state_counts().await,
            custody,
        }
    }

    /// Amount of `token` the ledger currently holds
    pub async fn custodied(&self, token: &Token) -> u128 {
        self.ledger.custodied(token).await
    }

    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.ledger.events().await
    }

    /// Render every future ledger event into `sink` on a background task
    pub fn spawn_receipts<F>(&self, sink: F) -> JoinHandle<u64>
    where
        F: FnMut(Receipt) + Send + 'static,
    {
        let events = self.ledger.subscribe();
        let notifier = self.notifier.clone();
        tokio::spawn(async move { notifier.run(events, sink).await })
    }

    /// Health check for the escrow node
    pub async fn health_check(&self) -> NodeHealth {
        let mut issues = Vec::new();

        if let Err(e) = self.ledger.audit_custody().await {
            issues.push(format!("Custody audit failed: {}", e));
        }

        NodeHealth {
            healthy: issues.is_empty(),
            issues,
            timestamp: self.clock.now(),
        }
    }
}
