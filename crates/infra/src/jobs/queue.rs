//! Job queue facade over a [`JobStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use jobgate_auth::{JobOwnership, OwnershipLookupError};
use jobgate_core::{JobId, UserId};

use super::store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
use super::types::{Job, JobRequest, Schedule, Transition};

/// Enqueue, track and look up jobs.
///
/// Cloning is cheap; all clones share one store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(InMemoryJobStore::arc())
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a `Pending` job, visible to workers immediately.
    pub fn enqueue(&self, owner_id: UserId, request: JobRequest) -> Result<JobId, JobStoreError> {
        let job = Job::new(owner_id, request);
        let kind = job.kind.clone();
        let job_id = self.store.insert(job)?;
        debug!(job_id = %job_id, user_id = %owner_id, %kind, "job enqueued");
        Ok(job_id)
    }

    /// Register a recurring job. The first run is pending immediately.
    pub fn enqueue_recurring(
        &self,
        owner_id: UserId,
        request: JobRequest,
        schedule: Schedule,
    ) -> Result<JobId, JobStoreError> {
        schedule.validate().map_err(JobStoreError::InvalidSchedule)?;
        let job = Job::recurring(owner_id, request, schedule, Utc::now());
        let job_id = self.store.insert(job)?;
        info!(job_id = %job_id, user_id = %owner_id, ?schedule, "recurring job registered");
        Ok(job_id)
    }

    /// Create a job that workers cannot see until [`JobQueue::commit`].
    pub fn stage(&self, owner_id: UserId, request: JobRequest) -> Result<JobId, JobStoreError> {
        self.store.insert(Job::new(owner_id, request).held())
    }

    /// Staged variant of [`JobQueue::enqueue_recurring`].
    pub fn stage_recurring(
        &self,
        owner_id: UserId,
        request: JobRequest,
        schedule: Schedule,
    ) -> Result<JobId, JobStoreError> {
        schedule.validate().map_err(JobStoreError::InvalidSchedule)?;
        self.store
            .insert(Job::recurring(owner_id, request, schedule, Utc::now()).held())
    }

    pub fn commit(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.store.release(job_id)?;
        debug!(job_id = %job_id, "staged job committed");
        Ok(())
    }

    pub fn abort(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.store.discard(job_id)?;
        debug!(job_id = %job_id, "staged job aborted");
        Ok(())
    }

    /// Current snapshot of a job, whatever its status. Never blocks on execution.
    ///
    /// Staged jobs are reported as not found.
    pub fn get_result(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        match self.store.get(job_id)? {
            Some(job) if !job.held => Ok(job),
            _ => Err(JobStoreError::NotFound(job_id)),
        }
    }

    /// Apply a transition to the job's current run.
    pub fn transition(&self, job_id: JobId, transition: Transition) -> Result<Job, JobStoreError> {
        let job = self.get_result(job_id)?;
        self.transition_run(job_id, job.run, transition)
    }

    /// Apply a transition to run `run`; fails with `StaleRun` if the job has moved on.
    pub fn transition_run(
        &self,
        job_id: JobId,
        run: u32,
        transition: Transition,
    ) -> Result<Job, JobStoreError> {
        let job = self.store.transition(job_id, run, transition, Utc::now())?;
        debug!(job_id = %job_id, run, status = ?job.status, "job transitioned");
        Ok(job)
    }

    /// Claim the next ready job for execution.
    pub fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        self.store.claim_next(Utc::now())
    }

    /// Re-arm due recurring jobs. Returns how many got a new run.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let rearmed = self.store.rearm_due(now)?;
        for job_id in &rearmed {
            debug!(job_id = %job_id, "recurring job re-armed");
        }
        Ok(rearmed.len())
    }

    pub fn cancel(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        // Staged jobs are not cancellable from outside.
        self.get_result(job_id)?;
        let job = self.store.cancel(job_id, Utc::now())?;
        info!(job_id = %job_id, run = job.run, "job cancelled");
        Ok(job)
    }

    pub fn list_for_owner(&self, owner_id: UserId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        self.store.list_by_owner(owner_id, limit)
    }

    pub fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.store.stats()
    }
}

impl JobOwnership for JobQueue {
    fn owner_of(&self, job_id: JobId) -> Result<Option<UserId>, OwnershipLookupError> {
        match self.store.get(job_id) {
            Ok(Some(job)) if !job.held => Ok(Some(job.owner_id)),
            Ok(_) => Ok(None),
            Err(e) => Err(OwnershipLookupError::Storage(e.to_string())),
        }
    }
}
