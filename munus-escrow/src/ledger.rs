//! Escrow Ledger - Job lifecycle and fund custody
//!
//! The ledger owns every job record and the custody totals behind them. It
//! exposes the five state-transition operations (`create_job`, `accept`,
//! `deliver`, `release`, `refund`) plus read-only queries.
//!
//! Mutations run under a single writer: each operation holds the write guard
//! from its first check through the awaited bank transfer to the final
//! commit, so no two transitions interleave and a failed transfer leaves no
//! trace. Readers take the read guard and see either the state before a
//! transition or the state after it.

use crate::{
    bank::TokenBank,
    custody::Custody,
    error::EscrowError,
    models::{Address, CreateJobRequest, Hash32, Job, JobId, JobState, LedgerEvent, Token, TxContext},
    EscrowResult,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Configuration for the escrow ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Account the bank uses as the custody pool
    pub custodian: Address,
    /// Capacity of the event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            custodian: Address::new("munus-escrow"),
            event_channel_capacity: 256,
        }
    }
}

/// Everything the single writer mutates together
#[derive(Debug, Default)]
struct LedgerState {
    /// Arena of jobs, indexed by job id
    jobs: Vec<Job>,
    custody: Custody,
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    fn job(&self, id: JobId) -> EscrowResult<&Job> {
        usize::try_from(id)
            .ok()
            .and_then(|slot| self.jobs.get(slot))
            .ok_or(EscrowError::NotFound(id))
    }

    fn job_mut(&mut self, id: JobId) -> EscrowResult<&mut Job> {
        usize::try_from(id)
            .ok()
            .and_then(|slot| self.jobs.get_mut(slot))
            .ok_or(EscrowError::NotFound(id))
    }
}

/// Main escrow ledger
pub struct EscrowLedger {
    bank: Arc<dyn TokenBank>,
    state: Arc<RwLock<LedgerState>>,
    events_tx: broadcast::Sender<LedgerEvent>,
}

impl EscrowLedger {
    /// Create an empty ledger over the given bank
    pub fn new(config: LedgerConfig, bank: Arc<dyn TokenBank>) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        info!("Initializing escrow ledger (custodian: {})", config.custodian);

        Self {
            bank,
            state: Arc::new(RwLock::new(LedgerState::default())),
            events_tx,
        }
    }

    /// Open a new job and take its funds into custody
    pub async fn create_job(&self, ctx: &TxContext, request: CreateJobRequest) -> EscrowResult<JobId> {
        let mut state = self.state.write().await;
        let result = self.create_job_locked(&mut state, ctx, request).await;

        match &result {
            Ok(id) => info!("Created job {} funded by {}", id, ctx.caller),
            Err(e) => warn!("createJob by {} rejected: {}", ctx.caller, e),
        }
        result
    }

    async fn create_job_locked(
        &self,
        state: &mut LedgerState,
        ctx: &TxContext,
        request: CreateJobRequest,
    ) -> EscrowResult<JobId> {
        if request.amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }

        if request.deadline <= ctx.now {
            return Err(EscrowError::PastDeadline {
                deadline: request.deadline,
                now: ctx.now,
            });
        }

        // Native jobs are funded by the value attached to the call; token
        // jobs must not carry any.
        let expected_value = if request.token.is_native() {
            request.amount
        } else {
            0
        };
        if ctx.value != expected_value {
            return Err(EscrowError::FundingMismatch {
                expected: expected_value,
                provided: ctx.value,
            });
        }

        let update = state.custody.after_lock(&request.token, request.amount)?;
        let id = state.jobs.len() as JobId;

        self.bank
            .pull(&request.token, &ctx.caller, request.amount)
            .await
            .map_err(|e| EscrowError::transfer_failed(e.to_string()))?;

        state.custody.apply(update);
        let job = Job::new(
            id,
            ctx.caller.clone(),
            request.token,
            request.amount,
            request.deadline,
            request.metadata_cid,
            ctx.now,
        );
        let event = LedgerEvent::JobCreated {
            id,
            creator: job.creator.clone(),
            token: job.token.clone(),
            amount: job.amount,
            deadline: job.deadline,
            metadata_cid: job.metadata_cid.clone(),
        };
        state.jobs.push(job);
        self.emit(state, event);

        Ok(id)
    }

    /// Take an open job as its worker
    pub async fn accept(&self, ctx: &TxContext, id: JobId) -> EscrowResult<Job> {
        let mut state = self.state.write().await;
        let result = self.accept_locked(&mut state, ctx, id);
        log_outcome("accept", id, ctx, &result);
        result
    }

    fn accept_locked(&self, state: &mut LedgerState, ctx: &TxContext, id: JobId) -> EscrowResult<Job> {
        let job = state.job(id)?;
        job.validate_transition(JobState::Accepted, "accept")?;
        if job.creator == ctx.caller {
            return Err(EscrowError::CreatorCannotAccept { id });
        }

        let job = state.job_mut(id)?;
        job.assignee = Some(ctx.caller.clone());
        job.state = JobState::Accepted;
        let accepted = job.clone();

        self.emit(
            state,
            LedgerEvent::JobAccepted {
                id,
                assignee: ctx.caller.clone(),
            },
        );
        Ok(accepted)
    }

    /// Record delivered work for an accepted job
    pub async fn deliver(
        &self,
        ctx: &TxContext,
        id: JobId,
        artifact_hash: Hash32,
        attestation_cid: String,
    ) -> EscrowResult<Job> {
        let mut state = self.state.write().await;
        let result = self.deliver_locked(&mut state, ctx, id, artifact_hash, attestation_cid);
        log_outcome("deliver", id, ctx, &result);
        result
    }

    fn deliver_locked(
        &self,
        state: &mut LedgerState,
        ctx: &TxContext,
        id: JobId,
        artifact_hash: Hash32,
        attestation_cid: String,
    ) -> EscrowResult<Job> {
        let job = state.job(id)?;
        job.validate_transition(JobState::Delivered, "deliver")?;
        if job.assignee.as_ref() != Some(&ctx.caller) {
            return Err(EscrowError::NotAssignee {
                id,
                caller: ctx.caller.clone(),
            });
        }

        let job = state.job_mut(id)?;
        job.artifact_hash = Some(artifact_hash);
        job.attestation_cid = Some(attestation_cid.clone());
        job.state = JobState::Delivered;
        let delivered = job.clone();

        self.emit(
            state,
            LedgerEvent::JobDelivered {
                id,
                artifact_hash,
                attestation_cid,
            },
        );
        Ok(delivered)
    }

    /// Pay a delivered job's funds to `to`
    pub async fn release(&self, ctx: &TxContext, id: JobId, to: Address) -> EscrowResult<Job> {
        let result = self.pay_out(ctx, id, to, Payout::Release).await;
        log_outcome("release", id, ctx, &result);
        result
    }

    /// Return an unfinished job's funds to `to` once the deadline has passed
    pub async fn refund(&self, ctx: &TxContext, id: JobId, to: Address) -> EscrowResult<Job> {
        let result = self.pay_out(ctx, id, to, Payout::Refund).await;
        log_outcome("refund", id, ctx, &result);
        result
    }

    /// Shared body of `release` and `refund`: checks, transfer, then commit
    async fn pay_out(
        &self,
        ctx: &TxContext,
        id: JobId,
        to: Address,
        payout: Payout,
    ) -> EscrowResult<Job> {
        let mut state = self.state.write().await;

        let job = state.job(id)?;
        job.validate_transition(payout.target(), payout.action())?;
        if job.creator != ctx.caller {
            return Err(EscrowError::NotCreator {
                id,
                caller: ctx.caller.clone(),
            });
        }
        if payout == Payout::Refund && !job.is_expired(ctx.now) {
            return Err(EscrowError::DeadlineNotReached {
                deadline: job.deadline,
                now: ctx.now,
            });
        }

        let token = job.token.clone();
        let amount = job.amount;
        let update = state.custody.after_unlock(&token, amount)?;

        self.bank
            .push(&token, &to, amount)
            .await
            .map_err(|e| EscrowError::transfer_failed(e.to_string()))?;

        state.custody.apply(update);
        let job = state.job_mut(id)?;
        job.state = payout.target();
        let settled = job.clone();

        let event = match payout {
            Payout::Release => LedgerEvent::Released { id, to, amount },
            Payout::Refund => LedgerEvent::Refunded { id, to, amount },
        };
        self.emit(&mut state, event);

        Ok(settled)
    }

    /// Append to the log and broadcast while the write guard is held
    fn emit(&self, state: &mut LedgerState, event: LedgerEvent) {
        state.events.push(event.clone());
        // No subscribers is fine; the log keeps the event.
        let _ = self.events_tx.send(event);
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: JobId) -> EscrowResult<Job> {
        self.state.read().await.job(id).cloned()
    }

    /// Number of jobs ever created; also the next id to be allocated
    pub async fn job_count(&self) -> u64 {
        self.state.read().await.jobs.len() as u64
    }

    pub async fn open_jobs(&self) -> Vec<Job> {
        self.jobs_where(|job| job.state == JobState::Open).await
    }

    pub async fn jobs_by_creator(&self, creator: &Address) -> Vec<Job> {
        self.jobs_where(|job| &job.creator == creator).await
    }

    pub async fn jobs_by_assignee(&self, assignee: &Address) -> Vec<Job> {
        self.jobs_where(|job| job.assignee.as_ref() == Some(assignee))
            .await
    }

    async fn jobs_where<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        self.state
            .read()
            .await
            .jobs
            .iter()
            .filter(|job| predicate(job))
            .cloned()
            .collect()
    }

    /// Amount of `token` currently in custody
    pub async fn custodied(&self, token: &Token) -> u128 {
        self.state.read().await.custody.total(token)
    }

    pub async fn custody_snapshot(&self) -> BTreeMap<Token, u128> {
        self.state.read().await.custody.snapshot()
    }

    /// Check that custody equals the sum of amounts of jobs still holding funds
    pub async fn audit_custody(&self) -> EscrowResult<()> {
        let state = self.state.read().await;

        let mut live: BTreeMap<Token, u128> = BTreeMap::new();
        for job in state.jobs.iter().filter(|job| job.state.holds_funds()) {
            let total = live.entry(job.token.clone()).or_default();
            *total = total
                .checked_add(job.amount)
                .ok_or_else(|| EscrowError::internal(format!("live total overflow for {}", job.token)))?;
        }

        let custody = state.custody.snapshot();
        for token in live.keys().chain(custody.keys()) {
            let expected = live.get(token).copied().unwrap_or(0);
            let held = custody.get(token).copied().unwrap_or(0);
            if expected != held {
                return Err(EscrowError::internal(format!(
                    "custody of {} is {} but live jobs hold {}",
                    token, held, expected
                )));
            }
        }
        Ok(())
    }

    /// Number of jobs in each state
    pub async fn state_counts(&self) -> BTreeMap<String, u64> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<String, u64> = JobState::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for job in &state.jobs {
            *counts.entry(job.state.to_string()).or_default() += 1;
        }
        counts
    }

    /// Full ordered event log
    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.state.read().await.events.clone()
    }

    /// Events for one job, in emission order
    pub async fn events_for(&self, id: JobId) -> Vec<LedgerEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.job_id() == id)
            .cloned()
            .collect()
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events_tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payout {
    Release,
    Refund,
}

impl Payout {
    fn target(self) -> JobState {
        match self {
            Self::Release => JobState::Released,
            Self::Refund => JobState::Refunded,
        }
    }

    fn action(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Refund => "refund",
        }
    }
}

fn log_outcome(op: &str, id: JobId, ctx: &TxContext, result: &EscrowResult<Job>) {
    match result {
        Ok(job) => info!("{} on job {} by {} -> {}", op, id, ctx.caller, job.state),
        Err(e) => warn!("{} on job {} by {} rejected: {}", op, id, ctx.caller, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::InMemoryBank;

    const NOW: u64 = 1_700_000_000;
    const AMOUNT: u128 = 100_000_000_000_000_000;

    struct Fixture {
        ledger: EscrowLedger,
        bank: InMemoryBank,
        creator: Address,
        worker: Address,
    }

    async fn fixture() -> Fixture {
        let config = LedgerConfig::default();
        let bank = InMemoryBank::new(config.custodian.clone());
        let creator = Address::new("creator");
        let worker = Address::new("worker");
        bank.credit(&Token::Native, &creator, 10 * AMOUNT).await;
        let ledger = EscrowLedger::new(config, Arc::new(bank.clone()));
        Fixture {
            ledger,
            bank,
            creator,
            worker,
        }
    }

    fn native_job(deadline: u64) -> CreateJobRequest {
        CreateJobRequest {
            token: Token::Native,
            amount: AMOUNT,
            deadline,
            metadata_cid: "cid-A".to_string(),
        }
    }

    fn as_caller(who: &Address, now: u64) -> TxContext {
        TxContext::new(who.clone(), now)
    }

    async fn delivered_job(f: &Fixture) -> JobId {
        let id = f
            .ledger
            .create_job(&as_caller(&f.creator, NOW).with_value(AMOUNT), native_job(NOW + 3600))
            .await
            .unwrap();
        f.ledger.accept(&as_caller(&f.worker, NOW), id).await.unwrap();
        f.ledger
            .deliver(&as_caller(&f.worker, NOW), id, Hash32([7; 32]), "cid-att".into())
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_job() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);

        let id = f.ledger.create_job(&ctx, native_job(NOW + 3600)).await.unwrap();
        assert_eq!(id, 0);

        let job = f.ledger.get_job(0).await.unwrap();
        assert_eq!(job.state, JobState::Open);
        assert_eq!(job.amount, AMOUNT);
        assert_eq!(job.deadline, NOW + 3600);
        assert_eq!(job.creator, f.creator);
        assert!(job.assignee.is_none());
        assert_eq!(f.ledger.custodied(&Token::Native).await, AMOUNT);
        assert_eq!(
            f.bank.balance_of(&Token::Native, &f.creator).await,
            9 * AMOUNT
        );

        let second = f.ledger.create_job(&ctx, native_job(NOW + 10)).await.unwrap();
        assert_eq!(second, 1);
        assert_eq!(f.ledger.job_count().await, 2);
    }

    #[tokio::test]
    async fn test_create_job_validation() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);

        let mut zero = native_job(NOW + 10);
        zero.amount = 0;
        assert_eq!(
            f.ledger.create_job(&as_caller(&f.creator, NOW), zero).await,
            Err(EscrowError::ZeroAmount)
        );

        assert!(matches!(
            f.ledger.create_job(&ctx, native_job(NOW)).await,
            Err(EscrowError::PastDeadline { .. })
        ));

        let under = as_caller(&f.creator, NOW).with_value(AMOUNT - 1);
        assert_eq!(
            f.ledger.create_job(&under, native_job(NOW + 10)).await,
            Err(EscrowError::FundingMismatch {
                expected: AMOUNT,
                provided: AMOUNT - 1
            })
        );

        let over = as_caller(&f.creator, NOW).with_value(AMOUNT + 1);
        assert!(matches!(
            f.ledger.create_job(&over, native_job(NOW + 10)).await,
            Err(EscrowError::FundingMismatch { .. })
        ));

        assert_eq!(f.ledger.job_count().await, 0);
        assert_eq!(f.ledger.custodied(&Token::Native).await, 0);
        assert!(f.ledger.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_external_token_job_pulls_from_creator() {
        let f = fixture().await;
        let usdc = Token::External(Address::new("usdc"));
        f.bank.credit(&usdc, &f.creator, 500).await;

        let request = CreateJobRequest {
            token: usdc.clone(),
            amount: 400,
            deadline: NOW + 60,
            metadata_cid: "cid-B".into(),
        };
        let with_value = as_caller(&f.creator, NOW).with_value(400);
        assert!(matches!(
            f.ledger.create_job(&with_value, request.clone()).await,
            Err(EscrowError::FundingMismatch { expected: 0, .. })
        ));

        let id = f
            .ledger
            .create_job(&as_caller(&f.creator, NOW), request.clone())
            .await
            .unwrap();
        assert_eq!(f.bank.balance_of(&usdc, &f.creator).await, 100);
        assert_eq!(f.ledger.custodied(&usdc).await, 400);
        assert_eq!(f.ledger.get_job(id).await.unwrap().token, usdc);

        // Only 100 left: the pull fails and nothing is recorded
        let err = f
            .ledger
            .create_job(&as_caller(&f.creator, NOW), request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransferFailed");
        assert_eq!(f.ledger.job_count().await, 1);
        assert_eq!(f.ledger.custodied(&usdc).await, 400);
    }

    #[tokio::test]
    async fn test_accept_rules() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let id = f.ledger.create_job(&ctx, native_job(NOW + 3600)).await.unwrap();

        assert_eq!(
            f.ledger.accept(&as_caller(&f.creator, NOW), id).await,
            Err(EscrowError::CreatorCannotAccept { id })
        );

        let job = f.ledger.accept(&as_caller(&f.worker, NOW), id).await.unwrap();
        assert_eq!(job.state, JobState::Accepted);
        assert_eq!(job.assignee, Some(f.worker.clone()));

        let other = Address::new("other");
        assert!(matches!(
            f.ledger.accept(&as_caller(&other, NOW), id).await,
            Err(EscrowError::InvalidState {
                state: JobState::Accepted,
                ..
            })
        ));
        assert_eq!(
            f.ledger.get_job(id).await.unwrap().assignee,
            Some(f.worker.clone())
        );

        assert_eq!(
            f.ledger.accept(&as_caller(&f.worker, NOW), 42).await,
            Err(EscrowError::NotFound(42))
        );
    }

    #[tokio::test]
    async fn test_deliver_rules() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let id = f.ledger.create_job(&ctx, native_job(NOW + 3600)).await.unwrap();
        let hash = Hash32([9; 32]);

        assert!(matches!(
            f.ledger
                .deliver(&as_caller(&f.worker, NOW), id, hash, "att".into())
                .await,
            Err(EscrowError::InvalidState { .. })
        ));

        f.ledger.accept(&as_caller(&f.worker, NOW), id).await.unwrap();
        let other = Address::new("other");
        assert!(matches!(
            f.ledger
                .deliver(&as_caller(&other, NOW), id, hash, "att".into())
                .await,
            Err(EscrowError::NotAssignee { .. })
        ));

        let job = f
            .ledger
            .deliver(&as_caller(&f.worker, NOW), id, hash, "cid-att".into())
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Delivered);
        assert_eq!(job.artifact_hash, Some(hash));
        assert_eq!(job.attestation_cid.as_deref(), Some("cid-att"));

        // A retried delivery sees the new state instead of duplicating effects
        assert!(matches!(
            f.ledger
                .deliver(&as_caller(&f.worker, NOW), id, Hash32([1; 32]), "x".into())
                .await,
            Err(EscrowError::InvalidState { .. })
        ));
        assert_eq!(
            f.ledger.get_job(id).await.unwrap().artifact_hash,
            Some(hash)
        );
    }

    #[tokio::test]
    async fn test_release_pays_worker_once() {
        let f = fixture().await;
        let id = delivered_job(&f).await;

        assert!(matches!(
            f.ledger
                .release(&as_caller(&f.worker, NOW), id, f.worker.clone())
                .await,
            Err(EscrowError::NotCreator { .. })
        ));

        let job = f
            .ledger
            .release(&as_caller(&f.creator, NOW), id, f.worker.clone())
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Released);
        assert_eq!(f.bank.balance_of(&Token::Native, &f.worker).await, AMOUNT);
        assert_eq!(f.ledger.custodied(&Token::Native).await, 0);

        assert!(matches!(
            f.ledger
                .release(&as_caller(&f.creator, NOW), id, f.worker.clone())
                .await,
            Err(EscrowError::InvalidState {
                state: JobState::Released,
                ..
            })
        ));
        assert_eq!(f.bank.balance_of(&Token::Native, &f.worker).await, AMOUNT);
    }

    #[tokio::test]
    async fn test_release_requires_delivery() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let id = f.ledger.create_job(&ctx, native_job(NOW + 3600)).await.unwrap();
        let creator_ctx = as_caller(&f.creator, NOW);

        assert!(matches!(
            f.ledger.release(&creator_ctx, id, f.worker.clone()).await,
            Err(EscrowError::InvalidState { .. })
        ));
        f.ledger.accept(&as_caller(&f.worker, NOW), id).await.unwrap();
        assert!(matches!(
            f.ledger.release(&creator_ctx, id, f.worker.clone()).await,
            Err(EscrowError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_transfer_leaves_job_unchanged() {
        let f = fixture().await;
        let id = delivered_job(&f).await;
        f.bank.block(&f.worker).await;

        let err = f
            .ledger
            .release(&as_caller(&f.creator, NOW), id, f.worker.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransferFailed");

        let job = f.ledger.get_job(id).await.unwrap();
        assert_eq!(job.state, JobState::Delivered);
        assert_eq!(f.ledger.custodied(&Token::Native).await, AMOUNT);
        assert_eq!(f.ledger.events_for(id).await.len(), 3);

        f.bank.unblock(&f.worker).await;
        f.ledger
            .release(&as_caller(&f.creator, NOW), id, f.worker.clone())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refund_after_deadline() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let id = f.ledger.create_job(&ctx, native_job(NOW + 2)).await.unwrap();

        assert!(matches!(
            f.ledger
                .refund(&as_caller(&f.creator, NOW + 2), id, f.creator.clone())
                .await,
            Err(EscrowError::DeadlineNotReached { .. })
        ));
        assert!(matches!(
            f.ledger
                .refund(&as_caller(&f.worker, NOW), id, f.worker.clone())
                .await,
            Err(EscrowError::NotCreator { .. })
        ));

        let job = f
            .ledger
            .refund(&as_caller(&f.creator, NOW + 5), id, f.creator.clone())
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Refunded);
        assert_eq!(
            f.bank.balance_of(&Token::Native, &f.creator).await,
            10 * AMOUNT
        );
        assert_eq!(f.ledger.custodied(&Token::Native).await, 0);
    }

    #[tokio::test]
    async fn test_refund_accepted_job_but_not_delivered_job() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let accepted = f.ledger.create_job(&ctx, native_job(NOW + 2)).await.unwrap();
        f.ledger
            .accept(&as_caller(&f.worker, NOW), accepted)
            .await
            .unwrap();

        let late = as_caller(&f.creator, NOW + 3600 * 2);
        f.ledger
            .refund(&late, accepted, f.creator.clone())
            .await
            .unwrap();

        let delivered = delivered_job(&f).await;
        assert!(matches!(
            f.ledger.refund(&late, delivered, f.creator.clone()).await,
            Err(EscrowError::InvalidState {
                state: JobState::Delivered,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_events_match_transitions() {
        let f = fixture().await;
        let mut rx = f.ledger.subscribe();
        let id = delivered_job(&f).await;
        f.ledger
            .release(&as_caller(&f.creator, NOW), id, f.worker.clone())
            .await
            .unwrap();

        let names: Vec<_> = f.ledger.events().await.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["JobCreated", "JobAccepted", "JobDelivered", "Released"]
        );

        for expected in names {
            assert_eq!(rx.recv().await.unwrap().name(), expected);
        }
    }

    #[tokio::test]
    async fn test_queries() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let open = f.ledger.create_job(&ctx, native_job(NOW + 60)).await.unwrap();
        let taken = f.ledger.create_job(&ctx, native_job(NOW + 60)).await.unwrap();
        f.ledger.accept(&as_caller(&f.worker, NOW), taken).await.unwrap();

        let ids = |jobs: Vec<Job>| jobs.into_iter().map(|j| j.id).collect::<Vec<_>>();
        assert_eq!(ids(f.ledger.open_jobs().await), vec![open]);
        assert_eq!(ids(f.ledger.jobs_by_creator(&f.creator).await), vec![open, taken]);
        assert_eq!(ids(f.ledger.jobs_by_assignee(&f.worker).await), vec![taken]);

        let counts = f.ledger.state_counts().await;
        assert_eq!(counts["Open"], 1);
        assert_eq!(counts["Accepted"], 1);
        assert_eq!(counts["Released"], 0);
    }

    #[tokio::test]
    async fn test_audit_custody_tracks_live_jobs() {
        let f = fixture().await;
        f.ledger.audit_custody().await.unwrap();

        let released = delivered_job(&f).await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        f.ledger.create_job(&ctx, native_job(NOW + 60)).await.unwrap();
        f.ledger.audit_custody().await.unwrap();

        f.ledger
            .release(&as_caller(&f.creator, NOW), released, f.worker.clone())
            .await
            .unwrap();
        f.ledger.audit_custody().await.unwrap();
        assert_eq!(f.ledger.custodied(&Token::Native).await, AMOUNT);
    }

    #[tokio::test]
    async fn test_custodian_identity_cannot_fund_or_receive() {
        let f = fixture().await;
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let funded = f.ledger.create_job(&ctx, native_job(NOW + 2)).await.unwrap();

        let custodian = LedgerConfig::default().custodian;
        let err = f
            .ledger
            .create_job(
                &as_caller(&custodian, NOW).with_value(AMOUNT),
                native_job(NOW + 2),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransferFailed");
        assert_eq!(f.ledger.job_count().await, 1);
        assert_eq!(f.ledger.custodied(&Token::Native).await, AMOUNT);

        // Refunding into the custody account is refused as well
        let later = as_caller(&f.creator, NOW + 5);
        let err = f
            .ledger
            .refund(&later, funded, custodian.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TransferFailed");
        assert_eq!(f.ledger.get_job(funded).await.unwrap().state, JobState::Open);

        f.ledger.refund(&later, funded, f.creator.clone()).await.unwrap();
        assert_eq!(f.bank.balance_of(&Token::Native, &custodian).await, 0);
        f.ledger.audit_custody().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_rejected_in_later_states() {
        let f = fixture().await;
        let delivered = delivered_job(&f).await;
        let released = delivered_job(&f).await;
        f.ledger
            .release(&as_caller(&f.creator, NOW), released, f.worker.clone())
            .await
            .unwrap();
        let ctx = as_caller(&f.creator, NOW).with_value(AMOUNT);
        let refunded = f.ledger.create_job(&ctx, native_job(NOW + 2)).await.unwrap();
        f.ledger
            .refund(&as_caller(&f.creator, NOW + 5), refunded, f.creator.clone())
            .await
            .unwrap();

        let other = Address::new("other");
        for (id, state) in [
            (delivered, JobState::Delivered),
            (released, JobState::Released),
            (refunded, JobState::Refunded),
        ] {
            let before = f.ledger.get_job(id).await.unwrap();
            let events = f.ledger.events().await.len();

            let result = f.ledger.accept(&as_caller(&other, NOW + 5), id).await;
            assert_eq!(
                result,
                Err(EscrowError::InvalidState {
                    id,
                    state,
                    action: "accept"
                })
            );
            assert_eq!(f.ledger.get_job(id).await.unwrap(), before);
            assert_eq!(f.ledger.events().await.len(), events);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_apply_once() {
        let config = LedgerConfig::default();
        let bank = InMemoryBank::new(config.custodian.clone());
        let creator = Address::new("creator");
        bank.credit(&Token::Native, &creator, AMOUNT).await;
        let ledger = Arc::new(EscrowLedger::new(config, Arc::new(bank.clone())));

        let ctx = as_caller(&creator, NOW).with_value(AMOUNT);
        let id = ledger.create_job(&ctx, native_job(NOW + 3600)).await.unwrap();

        let accepts: Vec<_> = ["w1", "w2", "w3", "w4"]
            .into_iter()
            .map(|worker| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger.accept(&TxContext::new(worker, NOW), id).await
                })
            })
            .collect();
        let mut winners = Vec::new();
        for handle in accepts {
            if let Ok(job) = handle.await.unwrap() {
                winners.push(job.assignee);
            }
        }
        assert_eq!(winners.len(), 1);
        let worker = winners.remove(0).unwrap();

        ledger
            .deliver(&as_caller(&worker, NOW), id, Hash32([4; 32]), "att".into())
            .await
            .unwrap();

        let payouts: Vec<_> = (0..4)
            .map(|n| {
                let ledger = ledger.clone();
                let creator = creator.clone();
                let to = worker.clone();
                tokio::spawn(async move {
                    let ctx = TxContext::new(creator.clone(), NOW + 7200);
                    if n % 2 == 0 {
                        ledger.release(&ctx, id, to).await
                    } else {
                        ledger.refund(&ctx, id, creator).await
                    }
                })
            })
            .collect();
        let mut settled = 0;
        for handle in payouts {
            if handle.await.unwrap().is_ok() {
                settled += 1;
            }
        }
        assert_eq!(settled, 1);

        let names: Vec<_> = ledger.events_for(id).await.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["JobCreated", "JobAccepted", "JobDelivered", "Released"]);
        assert_eq!(bank.balance_of(&Token::Native, &worker).await, AMOUNT);
        assert_eq!(ledger.custodied(&Token::Native).await, 0);
    }
}
