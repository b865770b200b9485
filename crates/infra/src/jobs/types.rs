//! Core job types and the per-run state machine.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use jobgate_core::{JobId, UserId};

/// Completed runs kept on a recurring job.
pub const MAX_RUN_HISTORY: usize = 20;

/// Job kind for routing to the registered executor (e.g. `analysis.chart`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn type_name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a caller submits: an executor kind plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: JobKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl JobRequest {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: JobKind::new(kind),
            payload,
        }
    }
}

/// Job execution status (of the current run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Currently being executed
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The executor returned an error.
    Execution,
    /// The executor panicked.
    Panicked,
    /// No executor registered for the job kind.
    NoExecutor,
    /// Cancelled by the owner before completion.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl JobFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureReason::Execution, message)
    }

    pub fn cancelled() -> Self {
        Self::new(FailureReason::Cancelled, "cancelled by owner")
    }
}

/// Output or error detail of a terminal run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Output(serde_json::Value),
    Error(JobFailure),
}

/// A requested state change. Valid moves: `Pending → Running → Succeeded | Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Start,
    Succeed(serde_json::Value),
    Fail(JobFailure),
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Running,
            Transition::Succeed(_) => JobStatus::Succeeded,
            Transition::Fail(_) => JobStatus::Failed,
        }
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Recurrence schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Schedule {
    /// Fixed interval between ticks.
    Every { interval_secs: u64 },
    /// Once a day at `hour:minute` UTC.
    DailyAt { hour: u32, minute: u32 },
}

impl Schedule {
    pub fn every(interval: std::time::Duration) -> Self {
        Self::Every {
            interval_secs: interval.as_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Schedule::Every { interval_secs: 0 } => Err("interval must be at least one second".to_string()),
            Schedule::Every { .. } => Ok(()),
            Schedule::DailyAt { hour, minute } if hour > 23 || minute > 59 => {
                Err(format!("invalid time of day {hour:02}:{minute:02}"))
            }
            Schedule::DailyAt { .. } => Ok(()),
        }
    }

    /// First tick strictly after `after`. Only meaningful for a validated schedule.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Every { interval_secs } => {
                let secs = i64::try_from(interval_secs.max(1)).unwrap_or(i64::MAX);
                after + Duration::try_seconds(secs).unwrap_or(Duration::MAX)
            }
            Schedule::DailyAt { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
                let today = Utc.from_utc_datetime(&after.date_naive().and_time(time));
                if today > after {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }
}

/// Recurrence state of a recurring job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub schedule: Schedule,
    pub next_run_at: DateTime<Utc>,
    /// `false` once cancelled; the job is never re-armed again.
    pub active: bool,
}

/// A completed run of a recurring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: u32,
    pub status: JobStatus,
    pub result: JobOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

/// A background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Submitting user; immutable.
    pub owner_id: UserId,
    /// Job kind for routing
    pub kind: JobKind,
    /// Opaque payload, handed to the executor as-is
    pub payload: serde_json::Value,
    /// Status of the current run
    pub status: JobStatus,
    /// Present iff `status` is terminal
    pub result: Option<JobOutcome>,
    /// Current run generation (starts at 1)
    pub run: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    /// Earlier completed runs, oldest first (recurring jobs only)
    pub history: Vec<RunRecord>,
    /// Staged but not yet visible to workers
    #[serde(skip)]
    pub(crate) held: bool,
}

impl Job {
    /// Create a new one-shot job.
    pub fn new(owner_id: UserId, request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner_id,
            kind: request.kind,
            payload: request.payload,
            status: JobStatus::Pending,
            result: None,
            run: 1,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            recurrence: None,
            history: Vec::new(),
            held: false,
        }
    }

    /// Create a recurring job. The first run is pending immediately; the next tick is
    /// scheduled from `now`.
    pub fn recurring(owner_id: UserId, request: JobRequest, schedule: Schedule, now: DateTime<Utc>) -> Self {
        let mut job = Self::new(owner_id, request);
        job.recurrence = Some(Recurrence {
            schedule,
            next_run_at: schedule.next_after(now),
            active: true,
        });
        job
    }

    pub(crate) fn held(mut self) -> Self {
        self.held = true;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Can a worker claim this job?
    pub fn is_ready(&self) -> bool {
        !self.held && self.status == JobStatus::Pending
    }

    /// Apply a state change to the current run.
    pub fn apply(&mut self, transition: Transition, at: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let invalid = InvalidTransition {
            from: self.status,
            to: transition.target(),
        };

        match (self.status, transition) {
            (JobStatus::Pending, Transition::Start) => {
                self.status = JobStatus::Running;
                self.started_at = Some(at);
            }
            (JobStatus::Running, Transition::Succeed(output)) => {
                self.finish(JobStatus::Succeeded, JobOutcome::Output(output), at);
            }
            (JobStatus::Running, Transition::Fail(failure)) => {
                self.finish(JobStatus::Failed, JobOutcome::Error(failure), at);
            }
            _ => return Err(invalid),
        }

        self.updated_at = at;
        Ok(())
    }

    fn finish(&mut self, status: JobStatus, outcome: JobOutcome, at: DateTime<Utc>) {
        self.status = status;
        self.result = Some(outcome);
        self.completed_at = Some(at);
    }

    /// Result of the latest completed run: the current one if terminal, otherwise the
    /// most recent archived run.
    pub fn latest_result(&self) -> Option<&JobOutcome> {
        self.result
            .as_ref()
            .or_else(|| self.history.last().map(|r| &r.result))
    }

    /// Is an active recurrence due at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.recurrence
            .as_ref()
            .is_some_and(|r| r.active && r.next_run_at <= now)
    }

    /// Start a fresh run of a due recurring job.
    ///
    /// Returns `false` (and only advances `next_run_at`) when the current run is still
    /// pending or running; overlapping runs are coalesced.
    pub fn rearm(&mut self, now: DateTime<Utc>) -> bool {
        let Some(recurrence) = self.recurrence.as_mut() else {
            return false;
        };
        if !recurrence.active || recurrence.next_run_at > now {
            return false;
        }
        recurrence.next_run_at = recurrence.schedule.next_after(now);

        if !self.status.is_terminal() {
            return false;
        }

        if let (Some(result), Some(completed_at)) = (self.result.take(), self.completed_at.take()) {
            self.history.push(RunRecord {
                run: self.run,
                status: self.status,
                result,
                started_at: self.started_at,
                completed_at,
            });
            if self.history.len() > MAX_RUN_HISTORY {
                let excess = self.history.len() - MAX_RUN_HISTORY;
                self.history.drain(..excess);
            }
        }

        self.run += 1;
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.updated_at = now;
        true
    }

    /// Stop recurrence and fail the current run if it has not finished.
    ///
    /// Returns `false` when there was nothing to cancel.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if let Some(recurrence) = self.recurrence.as_mut() {
            changed |= recurrence.active;
            recurrence.active = false;
        }
        if !self.status.is_terminal() {
            self.finish(JobStatus::Failed, JobOutcome::Error(JobFailure::cancelled()), now);
            changed = true;
        }
        if changed {
            self.updated_at = now;
        }
        changed
    }
}

/// Result of job execution, returned by executors.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed successfully with output
    Success(serde_json::Value),
    /// Job failed with an error
    Failure(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn request() -> JobRequest {
        JobRequest::new("analysis.chart", json!({"symbol": "BTC"}))
    }

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new(UserId::new(), request());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());

        let now = Utc::now();
        job.apply(Transition::Start, now).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.result.is_none());

        job.apply(Transition::Succeed(json!({"trend": "up"})), now).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(JobOutcome::Output(json!({"trend": "up"}))));
        assert_eq!(job.completed_at, Some(now));
    }

    #[test]
    fn terminal_state_is_stable() {
        let mut job = Job::new(UserId::new(), request());
        let now = Utc::now();
        job.apply(Transition::Start, now).unwrap();
        job.apply(Transition::Succeed(json!(1)), now).unwrap();

        let err = job.apply(Transition::Succeed(json!(2)), now).unwrap_err();
        assert_eq!(err, InvalidTransition { from: JobStatus::Succeeded, to: JobStatus::Succeeded });

        assert!(job.apply(Transition::Fail(JobFailure::execution("late")), now).is_err());
        assert!(job.apply(Transition::Start, now).is_err());
        assert_eq!(job.result, Some(JobOutcome::Output(json!(1))));
    }

    #[test]
    fn cannot_skip_running() {
        let mut job = Job::new(UserId::new(), request());
        let err = job.apply(Transition::Succeed(json!(null)), Utc::now()).unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn every_schedule_adds_interval() {
        let s = Schedule::Every { interval_secs: 90 };
        assert_eq!(s.next_after(at("2026-01-01T00:00:00Z")), at("2026-01-01T00:01:30Z"));
    }

    #[test]
    fn daily_schedule_picks_next_occurrence() {
        let s = Schedule::DailyAt { hour: 9, minute: 30 };
        assert_eq!(s.next_after(at("2026-01-01T08:00:00Z")), at("2026-01-01T09:30:00Z"));
        assert_eq!(s.next_after(at("2026-01-01T09:30:00Z")), at("2026-01-02T09:30:00Z"));
        assert_eq!(s.next_after(at("2026-01-01T23:59:00Z")), at("2026-01-02T09:30:00Z"));
    }

    #[test]
    fn schedule_validation() {
        assert!(Schedule::Every { interval_secs: 0 }.validate().is_err());
        assert!(Schedule::DailyAt { hour: 24, minute: 0 }.validate().is_err());
        assert!(Schedule::DailyAt { hour: 23, minute: 59 }.validate().is_ok());
    }

    #[test]
    fn rearm_archives_completed_run() {
        let t0 = at("2026-01-01T00:00:00Z");
        let mut job = Job::recurring(UserId::new(), request(), Schedule::Every { interval_secs: 60 }, t0);

        job.apply(Transition::Start, t0).unwrap();
        job.apply(Transition::Succeed(json!({"run": 1})), t0).unwrap();

        // Not due yet.
        assert!(!job.rearm(t0 + Duration::seconds(30)));
        assert_eq!(job.run, 1);

        let t1 = t0 + Duration::seconds(60);
        assert!(job.rearm(t1));
        assert_eq!(job.run, 2);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert_eq!(job.latest_result(), Some(&JobOutcome::Output(json!({"run": 1}))));
        assert_eq!(job.recurrence.as_ref().unwrap().next_run_at, t1 + Duration::seconds(60));
    }

    #[test]
    fn rearm_coalesces_unfinished_run() {
        let t0 = at("2026-01-01T00:00:00Z");
        let mut job = Job::recurring(UserId::new(), request(), Schedule::Every { interval_secs: 60 }, t0);

        let t1 = t0 + Duration::seconds(61);
        assert!(!job.rearm(t1));
        assert_eq!(job.run, 1);
        assert_eq!(job.recurrence.as_ref().unwrap().next_run_at, t1 + Duration::seconds(60));
    }

    #[test]
    fn history_is_bounded() {
        let mut now = at("2026-01-01T00:00:00Z");
        let mut job = Job::recurring(UserId::new(), request(), Schedule::Every { interval_secs: 1 }, now);

        for i in 0..(MAX_RUN_HISTORY as u32 + 5) {
            job.apply(Transition::Start, now).unwrap();
            job.apply(Transition::Succeed(json!(i)), now).unwrap();
            now += Duration::seconds(1);
            assert!(job.rearm(now));
        }

        assert_eq!(job.history.len(), MAX_RUN_HISTORY);
        assert_eq!(job.history.last().unwrap().run, job.run - 1);
    }

    #[test]
    fn cancel_fails_pending_run_and_stops_recurrence() {
        let t0 = at("2026-01-01T00:00:00Z");
        let mut job = Job::recurring(UserId::new(), request(), Schedule::Every { interval_secs: 60 }, t0);

        assert!(job.cancel(t0));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result, Some(JobOutcome::Error(JobFailure::cancelled())));
        assert!(!job.is_due(t0 + Duration::days(1)));
        assert!(!job.rearm(t0 + Duration::days(1)));

        // Second cancel is a no-op.
        assert!(!job.cancel(t0));
    }

    #[test]
    fn cancel_keeps_completed_result() {
        let mut job = Job::new(UserId::new(), request());
        let now = Utc::now();
        job.apply(Transition::Start, now).unwrap();
        job.apply(Transition::Succeed(json!("done")), now).unwrap();

        assert!(!job.cancel(now));
        assert_eq!(job.status, JobStatus::Succeeded);
    }
}
