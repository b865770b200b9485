//! Submission service: the operations exposed to the request layer.
//!
//! Composes admission (`UsageGate`), usage recording (`UsageLedger`), the `JobQueue` and the
//! `AccessGuard`. A job is only released to workers once its usage record is written; if
//! recording fails the staged job is discarded.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use jobgate_auth::{AccessDecision, AccessGuard, OwnershipLookupError};
use jobgate_core::{JobId, UserId};
use jobgate_metering::{
    Admission, GateError, InMemoryUsageStore, MeteringConfig, RejectReason, SubscriptionSource, UsageGate,
    UsageLedger, UsageReport,
};

use crate::jobs::{Job, JobQueue, JobRequest, JobStoreError, Schedule};

/// Which quota turned a submission away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Daily,
    Monthly,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKind::Daily => f.write_str("daily"),
            QuotaKind::Monthly => f.write_str("monthly"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("invalid user: {0}")]
    InvalidUser(String),

    #[error("{kind} limit exceeded ({used}/{limit})")]
    QuotaExceeded { kind: QuotaKind, used: u64, limit: u32 },

    #[error("usage check failed: {0}")]
    UsageCheckFailed(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("access denied to job {0}")]
    AccessDenied(JobId),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SubmissionError {
    /// Failures of the system rather than of the request. Surfaced generically.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, SubmissionError::UsageCheckFailed(_) | SubmissionError::Storage(_))
    }
}

impl From<RejectReason> for SubmissionError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::DailyLimitExceeded { used, limit } => SubmissionError::QuotaExceeded {
                kind: QuotaKind::Daily,
                used,
                limit,
            },
            RejectReason::MonthlyLimitExceeded { used, limit } => SubmissionError::QuotaExceeded {
                kind: QuotaKind::Monthly,
                used,
                limit,
            },
        }
    }
}

impl From<GateError> for SubmissionError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::UsageCheckFailed(msg) => SubmissionError::UsageCheckFailed(msg),
        }
    }
}

impl From<OwnershipLookupError> for SubmissionError {
    fn from(err: OwnershipLookupError) -> Self {
        SubmissionError::Storage(err.to_string())
    }
}

impl From<JobStoreError> for SubmissionError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(job_id) => SubmissionError::JobNotFound(job_id),
            JobStoreError::InvalidTransition { .. }
            | JobStoreError::StaleRun { .. }
            | JobStoreError::AlreadyReleased(_) => SubmissionError::InvalidStateTransition(err.to_string()),
            JobStoreError::InvalidSchedule(msg) => SubmissionError::InvalidRequest(msg),
            JobStoreError::AlreadyExists(_) | JobStoreError::Storage(_) => SubmissionError::Storage(err.to_string()),
        }
    }
}

/// Entry point for submitting, polling and managing metered jobs.
#[derive(Debug)]
pub struct SubmissionService {
    gate: UsageGate,
    queue: JobQueue,
    guard: AccessGuard<JobQueue>,
}

impl SubmissionService {
    pub fn new(gate: UsageGate, queue: JobQueue) -> Self {
        let guard = AccessGuard::new(queue.clone());
        Self { gate, queue, guard }
    }

    /// In-memory usage and job stores (tests/dev).
    pub fn in_memory(config: MeteringConfig, subscriptions: Arc<dyn SubscriptionSource>) -> Self {
        let ledger = UsageLedger::new(InMemoryUsageStore::arc());
        Self::new(UsageGate::new(ledger, subscriptions, config), JobQueue::in_memory())
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn gate(&self) -> &UsageGate {
        &self.gate
    }

    /// Admit, stage, record usage, then release the job to workers.
    pub async fn submit(&self, owner_id: UserId, request: JobRequest) -> Result<JobId, SubmissionError> {
        self.admit(owner_id).await?;

        let kind = request.kind.clone();
        let job_id = self
            .queue
            .stage(owner_id, request)
            .map_err(|e| self.log_failure("stage", owner_id, e.into()))?;
        self.record_and_commit(owner_id, job_id).await?;

        info!(job_id = %job_id, user_id = %owner_id, %kind, "job submitted");
        Ok(job_id)
    }

    /// Register a recurring job. Admission and usage apply once, at registration; the
    /// scheduled runs are not metered.
    pub async fn submit_recurring(
        &self,
        owner_id: UserId,
        request: JobRequest,
        schedule: Schedule,
    ) -> Result<JobId, SubmissionError> {
        schedule.validate().map_err(SubmissionError::InvalidRequest)?;
        self.admit(owner_id).await?;

        let job_id = self
            .queue
            .stage_recurring(owner_id, request, schedule)
            .map_err(|e| self.log_failure("stage_recurring", owner_id, e.into()))?;
        self.record_and_commit(owner_id, job_id).await?;

        info!(job_id = %job_id, user_id = %owner_id, ?schedule, "recurring job submitted");
        Ok(job_id)
    }

    /// Snapshot of a job the requester owns.
    pub fn poll(&self, job_id: JobId, requester_id: UserId) -> Result<Job, SubmissionError> {
        self.authorize(job_id, requester_id)?;
        self.queue
            .get_result(job_id)
            .map_err(|e| self.log_failure("get_result", requester_id, e.into()))
    }

    /// Does the requester own this job? Unknown jobs are simply `false`.
    pub fn check_access(&self, job_id: JobId, requester_id: UserId) -> Result<bool, SubmissionError> {
        match self.authorize(job_id, requester_id) {
            Ok(()) => Ok(true),
            Err(SubmissionError::AccessDenied(_) | SubmissionError::JobNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn cancel(&self, job_id: JobId, requester_id: UserId) -> Result<Job, SubmissionError> {
        self.authorize(job_id, requester_id)?;
        self.queue
            .cancel(job_id)
            .map_err(|e| self.log_failure("cancel", requester_id, e.into()))
    }

    pub fn list_jobs(&self, requester_id: UserId, limit: usize) -> Result<Vec<Job>, SubmissionError> {
        self.queue
            .list_for_owner(requester_id, limit)
            .map_err(|e| self.log_failure("list_jobs", requester_id, e.into()))
    }

    pub async fn usage(&self, requester_id: UserId) -> Result<UsageReport, SubmissionError> {
        self.gate
            .usage_report(requester_id)
            .await
            .map_err(|e| self.log_failure("usage_report", requester_id, e.into()))
    }

    /// Owner-only gate in front of every job-scoped operation.
    fn authorize(&self, job_id: JobId, requester_id: UserId) -> Result<(), SubmissionError> {
        match self.guard.verify(job_id, requester_id) {
            Ok(AccessDecision::Allowed) => Ok(()),
            Ok(AccessDecision::Denied) => Err(SubmissionError::AccessDenied(job_id)),
            Ok(AccessDecision::NotFound) => Err(SubmissionError::JobNotFound(job_id)),
            Err(e) => Err(self.log_failure("verify_access", requester_id, e.into())),
        }
    }

    async fn admit(&self, owner_id: UserId) -> Result<(), SubmissionError> {
        match self.gate.admit(owner_id).await {
            Ok(Admission::Admit) => Ok(()),
            Ok(Admission::Reject(reason)) => {
                warn!(user_id = %owner_id, ?reason, "submission rejected");
                Err(reason.into())
            }
            Err(e) => Err(self.log_failure("admit", owner_id, e.into())),
        }
    }

    async fn record_and_commit(&self, owner_id: UserId, job_id: JobId) -> Result<(), SubmissionError> {
        if let Err(e) = self.gate.ledger().record(owner_id, self.gate.service()).await {
            if let Err(abort_err) = self.queue.abort(job_id) {
                error!(job_id = %job_id, error = %abort_err, "failed to discard staged job");
            }
            return Err(self.log_failure("record_usage", owner_id, SubmissionError::Storage(e.to_string())));
        }

        // Usage is already on the ledger; a failed release leaves the job staged.
        self.queue
            .commit(job_id)
            .map_err(|e| self.log_failure("commit", owner_id, e.into()))
    }

    fn log_failure(&self, operation: &str, user_id: UserId, err: SubmissionError) -> SubmissionError {
        if err.is_infrastructure() {
            error!(operation, user_id = %user_id, error = %err, "submission infrastructure failure");
        }
        err
    }
}
