//! Service wiring: stores, metering, submission service and background workers.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use jobgate_infra::jobs::{
    JobExecutor, JobExecutorHandle, JobQueue, JobResult, RecurringScheduler, RecurringSchedulerHandle,
};
use jobgate_infra::subscriptions::{load_subscriptions, PostgresSubscriptionSource};
use jobgate_infra::usage_store::PostgresUsageStore;
use jobgate_infra::SubmissionService;
use jobgate_metering::{
    InMemoryUsageStore, StaticSubscriptionSource, SubscriptionError, SubscriptionSource, UsageError, UsageGate,
    UsageLedger, UsageStore,
};

use crate::config::ApiConfig;

/// Shared application state handed to every handler.
#[derive(Debug)]
pub struct AppServices {
    pub submissions: SubmissionService,
    workers: Mutex<Option<Workers>>,
}

#[derive(Debug)]
struct Workers {
    executor: JobExecutorHandle,
    scheduler: RecurringSchedulerHandle,
}

impl AppServices {
    /// Stop the worker pool and the recurring scheduler. Idempotent.
    pub fn shutdown(&self) {
        let workers = match self.workers.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(workers) = workers {
            workers.scheduler.shutdown();
            workers.executor.shutdown();
            info!("background workers stopped");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Subscriptions(#[from] SubscriptionError),
    #[error("failed to spawn background worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Build all services and start the background workers.
pub async fn build_services(config: &ApiConfig) -> Result<AppServices, BuildError> {
    let postgres = match &config.database_url {
        Some(url) => {
            let store = PostgresUsageStore::connect(url).await?;
            store.ensure_schema().await?;
            Some(store)
        }
        None => None,
    };

    let subscriptions = subscription_source(config, postgres.as_ref()).await?;
    let usage_store: Arc<dyn UsageStore> = match postgres {
        Some(store) => {
            info!("usage ledger backed by postgres");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; usage ledger is in-memory");
            InMemoryUsageStore::arc()
        }
    };

    let gate = UsageGate::new(UsageLedger::new(usage_store), subscriptions, config.metering.clone());
    let queue = JobQueue::in_memory();

    let mut executor = JobExecutor::new(queue.clone());
    register_handlers(&mut executor);
    let executor = executor.spawn(config.executor.clone())?;
    let scheduler = RecurringScheduler::new(queue.clone(), config.scheduler.clone()).spawn()?;

    Ok(AppServices {
        submissions: SubmissionService::new(gate, queue),
        workers: Mutex::new(Some(Workers { executor, scheduler })),
    })
}

/// Plan table file first, then the `user_subscriptions` table, else everyone is free tier.
async fn subscription_source(
    config: &ApiConfig,
    postgres: Option<&PostgresUsageStore>,
) -> Result<Arc<dyn SubscriptionSource>, BuildError> {
    if let Some(path) = &config.subscriptions_file {
        let table = load_subscriptions(path)?;
        info!(path = %path.display(), users = table.len(), "subscriptions loaded from plan table");
        return Ok(Arc::new(table));
    }

    if let Some(store) = postgres {
        let source = PostgresSubscriptionSource::new(store.pool().clone());
        source.ensure_schema().await?;
        info!("subscriptions read from postgres");
        return Ok(Arc::new(source));
    }

    warn!("no subscription source configured; all users get free-tier limits");
    Ok(Arc::new(StaticSubscriptionSource::new()))
}

/// Executors available in this binary. Analysis executors register here by kind.
fn register_handlers(executor: &mut JobExecutor) {
    executor.register_handler("echo", |job| JobResult::Success(job.payload.clone()));
    executor.register_handler("fail", |job| {
        let message = job.payload["message"].as_str().unwrap_or("requested failure");
        JobResult::Failure(message.to_string())
    });
}
