//! Background job system: queue, worker pool and recurring scheduler.
//!
//! ## Design
//!
//! - Jobs are owned by the submitting user and routed by kind
//! - Payloads are opaque; executors are registered per kind
//! - One run at a time per job; recurring jobs start a new run per tick under the same id
//! - Transitions are generation-checked so a late result cannot overwrite a newer run
//!
//! ## Components
//!
//! - `Job`: Core job abstraction with payload, status and run history
//! - `JobStore`: Persistence for jobs (in-memory or durable)
//! - `JobQueue`: Enqueue, staged enqueue, lookup and transitions
//! - `JobExecutor`: Worker pool running registered handlers
//! - `RecurringScheduler`: Re-arms due recurring jobs

pub mod executor;
pub mod queue;
pub mod recurring;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use queue::JobQueue;
pub use recurring::{RecurringScheduler, RecurringSchedulerConfig, RecurringSchedulerHandle};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    FailureReason, Job, JobFailure, JobKind, JobOutcome, JobRequest, JobResult, JobStatus, Schedule,
    Transition,
};
