//! Usage ledger: append-only records of accepted submissions, counted per window.
//!
//! Counting records (instead of maintaining a running counter) keeps an auditable trail
//! and cannot drift from missed decrements. Each check is a scan over the user's records
//! for one service.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use jobgate_core::UserId;

/// One accepted submission. Never mutated or deleted by jobgate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: UserId,
    /// Queue/service name the usage counts against.
    pub service: String,
    pub usage_date: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(user_id: UserId, service: impl Into<String>, usage_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            service: service.into(),
            usage_date,
        }
    }
}

/// Counting window, always relative to the wall clock at check time (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageWindow {
    /// `[start of current day, now)`
    Day,
    /// `[start of current month, now)`
    Month,
}

impl UsageWindow {
    /// Inclusive lower bound of the window containing `now`.
    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let first = match self {
            UsageWindow::Day => today,
            UsageWindow::Month => today.with_day(1).unwrap_or(today),
        };
        Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageError {
    /// The record could not be persisted or the count could not be determined.
    #[error("usage storage error: {0}")]
    Storage(String),
}

/// Storage seam for usage records.
///
/// Implementations must distinguish "zero records" (`Ok(0)`) from "could not count" (`Err`).
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert(&self, record: UsageRecord) -> Result<(), UsageError>;

    /// Count records for `user_id`/`service` with `usage_date >= since`.
    async fn count_since(&self, user_id: UserId, service: &str, since: DateTime<Utc>) -> Result<u64, UsageError>;

    /// Lifetime count for `user_id`/`service`.
    async fn count_total(&self, user_id: UserId, service: &str) -> Result<u64, UsageError>;
}

/// In-memory usage store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    records: RwLock<Vec<UsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of every record (test/debug helper).
    pub fn all(&self) -> Vec<UsageRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    fn count_where(&self, pred: impl Fn(&UsageRecord) -> bool) -> Result<u64, UsageError> {
        let records = self
            .records
            .read()
            .map_err(|_| UsageError::Storage("usage store lock poisoned".to_string()))?;
        Ok(records.iter().filter(|r| pred(r)).count() as u64)
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn insert(&self, record: UsageRecord) -> Result<(), UsageError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| UsageError::Storage("usage store lock poisoned".to_string()))?;
        records.push(record);
        Ok(())
    }

    async fn count_since(&self, user_id: UserId, service: &str, since: DateTime<Utc>) -> Result<u64, UsageError> {
        self.count_where(|r| r.user_id == user_id && r.service == service && r.usage_date >= since)
    }

    async fn count_total(&self, user_id: UserId, service: &str) -> Result<u64, UsageError> {
        self.count_where(|r| r.user_id == user_id && r.service == service)
    }
}

/// Records and counts per-user, per-service usage.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger").finish_non_exhaustive()
    }
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Append one record stamped with the current time.
    pub async fn record(&self, user_id: UserId, service: &str) -> Result<UsageRecord, UsageError> {
        self.record_at(user_id, service, Utc::now()).await
    }

    pub async fn record_at(
        &self,
        user_id: UserId,
        service: &str,
        at: DateTime<Utc>,
    ) -> Result<UsageRecord, UsageError> {
        let record = UsageRecord::new(user_id, service, at);
        self.store.insert(record.clone()).await?;
        debug!(user_id = %user_id, service, record_id = %record.id, "usage recorded");
        Ok(record)
    }

    pub async fn count_since(
        &self,
        user_id: UserId,
        service: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u64, UsageError> {
        self.store.count_since(user_id, service, window_start).await
    }

    /// Usage inside the window that contains `now`.
    pub async fn usage_in(
        &self,
        user_id: UserId,
        service: &str,
        window: UsageWindow,
        now: DateTime<Utc>,
    ) -> Result<u64, UsageError> {
        self.count_since(user_id, service, window.start(now)).await
    }

    pub async fn count_total(&self, user_id: UserId, service: &str) -> Result<u64, UsageError> {
        self.store.count_total(user_id, service).await
    }
}
