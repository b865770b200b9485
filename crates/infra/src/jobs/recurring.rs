//! Background ticker that re-arms due recurring jobs.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::queue::JobQueue;

/// Config for the recurring job scheduler.
#[derive(Debug, Clone)]
pub struct RecurringSchedulerConfig {
    /// How often due jobs are re-armed
    pub tick_interval: Duration,
    pub name: String,
}

impl Default for RecurringSchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            name: "recurring-scheduler".to_string(),
        }
    }
}

impl RecurringSchedulerConfig {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Handle for the running scheduler (shutdown + trigger hook).
#[derive(Debug)]
pub struct RecurringSchedulerHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl RecurringSchedulerHandle {
    /// Request an immediate tick. Triggers are coalesced.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Gracefully stop the scheduler thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Re-arms recurring jobs on a fixed cadence so they re-trigger without a new submission.
#[derive(Debug, Clone)]
pub struct RecurringScheduler {
    queue: JobQueue,
    config: RecurringSchedulerConfig,
}

impl RecurringScheduler {
    pub fn new(queue: JobQueue, config: RecurringSchedulerConfig) -> Self {
        Self { queue, config }
    }

    /// Run one tick now. Failures are logged, never propagated.
    pub fn tick_once(&self) -> usize {
        match self.queue.tick(Utc::now()) {
            Ok(0) => 0,
            Ok(n) => {
                debug!(scheduler = %self.config.name, rearmed = n, "recurring jobs re-armed");
                n
            }
            Err(e) => {
                warn!(scheduler = %self.config.name, error = %e, "recurring tick failed");
                0
            }
        }
    }

    pub fn spawn(self) -> std::io::Result<RecurringSchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || scheduler_loop(self, shutdown_rx, trigger_rx))?;

        Ok(RecurringSchedulerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

fn scheduler_loop(
    scheduler: RecurringScheduler,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
) {
    let interval = scheduler.config.tick_interval;
    info!(scheduler = %scheduler.config.name, ?interval, "recurring scheduler started");

    let mut next_tick = Instant::now();

    loop {
        // Shutdown has priority.
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let mut pending = false;
        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            // Keep a stable cadence even if we were delayed.
            while next_tick <= now {
                next_tick += interval.max(Duration::from_millis(1));
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if pending {
            scheduler.tick_once();
            continue;
        }

        let sleep_for = next_tick
            .saturating_duration_since(Instant::now())
            .min(Duration::from_millis(250));
        thread::sleep(sleep_for);
    }

    info!(scheduler = %scheduler.config.name, "recurring scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobRequest, JobStatus, Schedule, Transition};
    use jobgate_core::UserId;
    use serde_json::json;

    #[test]
    fn tick_once_rearms_due_job() {
        let queue = JobQueue::in_memory();
        let scheduler = RecurringScheduler::new(queue.clone(), RecurringSchedulerConfig::default());
        let job_id = queue
            .enqueue_recurring(
                UserId::new(),
                JobRequest::new("report", json!({})),
                Schedule::Every { interval_secs: 1 },
            )
            .unwrap();

        // Current run still pending: nothing to do.
        assert_eq!(scheduler.tick_once(), 0);

        let claimed = queue.claim_next().unwrap().unwrap();
        queue.transition_run(job_id, claimed.run, Transition::Succeed(json!(1))).unwrap();

        thread::sleep(Duration::from_millis(1100));
        assert_eq!(scheduler.tick_once(), 1);
        let job = queue.get_result(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.run, 2);
    }

    #[test]
    fn spawned_scheduler_keeps_retriggering() {
        let queue = JobQueue::in_memory();
        let job_id = queue
            .enqueue_recurring(
                UserId::new(),
                JobRequest::new("report", json!({})),
                Schedule::Every { interval_secs: 1 },
            )
            .unwrap();

        let handle = RecurringScheduler::new(
            queue.clone(),
            RecurringSchedulerConfig::default().with_tick_interval(Duration::from_millis(20)),
        )
        .spawn()
        .unwrap();

        // Play the worker: complete every run we can claim until run 3 shows up.
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = 0;
        while Instant::now() < deadline && seen < 3 {
            if let Some(job) = queue.claim_next().unwrap() {
                seen = job.run;
                queue.transition_run(job_id, job.run, Transition::Succeed(json!(job.run))).unwrap();
            }
            handle.trigger();
            thread::sleep(Duration::from_millis(20));
        }
        handle.shutdown();

        assert!(seen >= 3);
        assert_eq!(queue.get_result(job_id).unwrap().history.len() as u32, seen - 1);
    }
}
