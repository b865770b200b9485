//! Worker pool that executes claimed jobs with registered handlers.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::queue::JobQueue;
use super::store::JobStoreError;
use super::types::{FailureReason, Job, JobFailure, JobKind, JobResult, JobStatus, Transition};

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often an idle worker polls for new jobs
    pub poll_interval: Duration,
    /// Number of worker threads
    pub workers: usize,
    /// Name for logging (workers are `{name}-{n}`)
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            workers: 4,
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown; waits for in-flight jobs to finish.
    pub fn shutdown(self) {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins {
            let _ = join.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        lock(&self.stats).clone()
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_panicked: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

fn lock(stats: &Mutex<ExecutorStats>) -> MutexGuard<'_, ExecutorStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background job executor.
///
/// Claims ready jobs from a [`JobQueue`], runs the handler registered for the job kind and
/// records the outcome on the run it claimed. The queue never looks inside a payload.
pub struct JobExecutor {
    queue: JobQueue,
    handlers: HashMap<String, JobHandler>,
}

impl JobExecutor {
    /// Create a new executor over the given queue.
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job kind.
    ///
    /// Patterns: an exact kind, a category (`analysis.*`), or `*`.
    pub fn register_handler<F>(&mut self, kind_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind_pattern.into(), Box::new(handler));
    }

    /// Get the handler for a job kind.
    fn get_handler(&self, kind: &JobKind) -> Option<&JobHandler> {
        // Try exact match first
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h);
        }

        // Try category match (e.g., "analysis.*" matches "analysis.chart"); longest prefix wins
        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = type_name.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler);
        if category.is_some() {
            return category;
        }

        // Try wildcard
        self.handlers.get("*")
    }

    /// Spawn `config.workers` worker threads.
    pub fn spawn(self, config: JobExecutorConfig) -> std::io::Result<JobExecutorHandle> {
        let executor = Arc::new(self);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let started = Instant::now();

        let mut shutdown = Vec::with_capacity(config.workers);
        let mut joins = Vec::with_capacity(config.workers);

        for n in 0..config.workers.max(1) {
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let executor = executor.clone();
            let stats = stats.clone();
            let config = config.clone();
            let name = format!("{}-{n}", config.name);

            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&executor, &name, &config, shutdown_rx, &stats, started))?;

            shutdown.push(shutdown_tx);
            joins.push(join);
        }

        info!(executor = %config.name, workers = joins.len(), "job executor started");

        Ok(JobExecutorHandle {
            shutdown,
            joins,
            stats,
        })
    }

    /// Execute a single claimed (`Running`) job and record its outcome.
    pub fn execute_one(&self, job: &Job) -> Result<Job, JobStoreError> {
        let transition = match self.get_handler(&job.kind) {
            None => {
                warn!(job_id = %job.id, kind = %job.kind, "no handler for job");
                Transition::Fail(JobFailure::new(
                    FailureReason::NoExecutor,
                    format!("no executor registered for kind: {}", job.kind),
                ))
            }
            Some(handler) => match panic::catch_unwind(AssertUnwindSafe(|| handler(job))) {
                Ok(JobResult::Success(output)) => Transition::Succeed(output),
                Ok(JobResult::Failure(message)) => Transition::Fail(JobFailure::execution(message)),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(job_id = %job.id, kind = %job.kind, panic = %message, "job handler panicked");
                    Transition::Fail(JobFailure::new(FailureReason::Panicked, message))
                }
            },
        };

        self.queue.transition_run(job.id, job.run, transition)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job handler panicked".to_string()
    }
}

fn worker_loop(
    executor: &JobExecutor,
    name: &str,
    config: &JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: &Mutex<ExecutorStats>,
    started: Instant,
) {
    debug!(worker = %name, "job worker started");

    loop {
        // Check for shutdown
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        lock(stats).uptime_secs = started.elapsed().as_secs();

        // Try to claim a job
        match executor.queue.claim_next() {
            Ok(Some(job)) => {
                debug!(worker = %name, job_id = %job.id, kind = %job.kind, run = job.run, "claimed job");

                lock(stats).current_running += 1;
                let result = executor.execute_one(&job);

                let mut s = lock(stats);
                s.current_running = s.current_running.saturating_sub(1);
                s.jobs_processed += 1;
                match &result {
                    Ok(done) if done.status == JobStatus::Succeeded => s.jobs_succeeded += 1,
                    Ok(done) => {
                        s.jobs_failed += 1;
                        if let Some(super::types::JobOutcome::Error(failure)) = &done.result {
                            if failure.reason == FailureReason::Panicked {
                                s.jobs_panicked += 1;
                            }
                        }
                    }
                    Err(_) => {}
                }
                drop(s);

                match result {
                    Ok(done) => debug!(
                        worker = %name,
                        job_id = %done.id,
                        run = done.run,
                        status = ?done.status,
                        "job finished"
                    ),
                    // Cancelled while running; the cancellation already stands as the result.
                    Err(e @ (JobStoreError::StaleRun { .. } | JobStoreError::InvalidTransition { .. })) => {
                        debug!(worker = %name, job_id = %job.id, error = %e, "discarding stale job result")
                    }
                    Err(e) => error!(worker = %name, job_id = %job.id, error = %e, "failed to record job result"),
                }
            }
            Ok(None) => {
                // No jobs available; sleep unless asked to stop.
                match shutdown_rx.recv_timeout(config.poll_interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
            Err(e) => {
                error!(worker = %name, error = %e, "failed to claim job");
                match shutdown_rx.recv_timeout(config.poll_interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        }
    }

    debug!(worker = %name, "job worker stopped");
}
