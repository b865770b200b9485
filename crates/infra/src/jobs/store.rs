//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use jobgate_core::{JobId, UserId};

use super::types::{Job, JobStatus, Transition};

/// Job store abstraction.
///
/// Every mutating call is applied atomically per job: status and run-generation checks and
/// the write happen under one lock (or one conditional update in a durable backend).
pub trait JobStore: Send + Sync {
    /// Insert a new job (staged or dispatchable, as built).
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Make a staged job visible to workers.
    fn release(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Remove a staged job that was never released.
    fn discard(&self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Claim the oldest ready job and move it to `Running`.
    /// Returns None if no jobs are available.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// Apply a transition to run `run` of a job.
    fn transition(
        &self,
        job_id: JobId,
        run: u32,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> Result<Job, JobStoreError>;

    /// Start a new run for every due recurring job. Returns the re-armed ids.
    fn rearm_due(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError>;

    /// Cancel a job (stop recurrence, fail the unfinished run).
    fn cancel(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError>;

    /// Most recent jobs of one owner, newest first.
    fn list_by_owner(&self, owner_id: UserId, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {job_id}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {job_id}: run {expected} is no longer current (now {current})")]
    StaleRun { job_id: JobId, expected: u32, current: u32 },
    #[error("job {0} was already released")]
    AlreadyReleased(JobId),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub recurring: usize,
    pub staged: usize,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.get(&job_id).cloned())
    }

    fn release(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        job.held = false;
        Ok(())
    }

    fn discard(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get(&job_id) {
            None => Err(JobStoreError::NotFound(job_id)),
            Some(job) if !job.held => Err(JobStoreError::AlreadyReleased(job_id)),
            Some(_) => {
                jobs.remove(&job_id);
                Ok(())
            }
        }
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write()?;

        // Oldest ready job first (by the time it last became pending).
        let next = jobs
            .values()
            .filter(|j| j.is_ready())
            .min_by_key(|j| (j.updated_at, j.created_at))
            .map(|j| j.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(None);
        };

        job.apply(Transition::Start, now)
            .map_err(|e| JobStoreError::InvalidTransition { job_id, from: e.from, to: e.to })?;
        Ok(Some(job.clone()))
    }

    fn transition(
        &self,
        job_id: JobId,
        run: u32,
        transition: Transition,
        at: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        if job.run != run {
            return Err(JobStoreError::StaleRun {
                job_id,
                expected: run,
                current: job.run,
            });
        }

        job.apply(transition, at)
            .map_err(|e| JobStoreError::InvalidTransition { job_id, from: e.from, to: e.to })?;
        Ok(job.clone())
    }

    fn rearm_due(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let mut jobs = self.write()?;
        let mut rearmed = Vec::new();

        for job in jobs.values_mut().filter(|j| !j.held && j.is_due(now)) {
            if job.rearm(now) {
                rearmed.push(job.id);
            }
        }

        Ok(rearmed)
    }

    fn cancel(&self, job_id: JobId, now: DateTime<Utc>) -> Result<Job, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        job.cancel(now);
        Ok(job.clone())
    }

    fn list_by_owner(&self, owner_id: UserId, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.owner_id == owner_id && !j.held)
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            if job.held {
                stats.staged += 1;
                continue;
            }
            if job.recurrence.as_ref().is_some_and(|r| r.active) {
                stats.recurring += 1;
            }
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}
