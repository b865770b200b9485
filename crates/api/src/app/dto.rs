use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobgate_core::JobId;
use jobgate_infra::jobs::{Job, JobOutcome, JobRequest, JobStatus, Schedule};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SubmitJobRequest {
    pub fn into_request(self) -> JobRequest {
        JobRequest::new(self.kind, self.payload)
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRecurringRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub schedule: Schedule,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
}

/// Public view of a job. The owner id is implied by the caller.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub run: u32,
    pub result: Option<JobOutcome>,
    /// Latest completed run's result (recurring jobs keep it while a new run is pending).
    pub latest_result: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recurring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let latest_result = job.latest_result().cloned();
        let active = job.recurrence.as_ref().filter(|r| r.active);
        Self {
            id: job.id,
            kind: job.kind.type_name().to_string(),
            status: job.status,
            run: job.run,
            latest_result,
            created_at: job.created_at,
            completed_at: job.completed_at,
            recurring: job.recurrence.is_some(),
            schedule: job.recurrence.as_ref().map(|r| r.schedule),
            next_run_at: active.map(|r| r.next_run_at),
            result: job.result,
        }
    }
}
