//! Admission gate: decides whether a user may submit one more job right now.
//!
//! The gate reads the subscription snapshot and the usage ledger, and never writes.
//! Recording usage for an admitted submission is the submitter's job.
//!
//! The admit-then-record sequence is not atomic: two concurrent submissions near a limit
//! can both be admitted. Quotas are soft; callers that need hard quotas must serialize
//! admission and recording per user.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use jobgate_core::UserId;

use crate::config::MeteringConfig;
use crate::plan::{Limit, PlanLimiter, Subscription};
use crate::usage::{UsageLedger, UsageWindow};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription lookup failed: {0}")]
    Lookup(String),
}

/// External billing lookup. `Ok(None)` means the user has no subscription.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn subscription(&self, user_id: UserId) -> Result<Option<Subscription>, SubscriptionError>;
}

/// Fixed subscription table for tests/dev.
#[derive(Debug, Default)]
pub struct StaticSubscriptionSource {
    inner: RwLock<HashMap<UserId, Subscription>>,
}

impl StaticSubscriptionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from `(user, subscription)` pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (UserId, Subscription)>) -> Self {
        Self {
            inner: RwLock::new(entries.into_iter().collect()),
        }
    }

    pub fn set(&self, user_id: UserId, subscription: Subscription) {
        self.write().insert(user_id, subscription);
    }

    pub fn remove(&self, user_id: UserId) {
        self.write().remove(&user_id);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A plain map cannot be left half-written, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, Subscription>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, Subscription>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SubscriptionSource for StaticSubscriptionSource {
    async fn subscription(&self, user_id: UserId) -> Result<Option<Subscription>, SubscriptionError> {
        Ok(self.read().get(&user_id).copied())
    }
}

/// Why a submission was turned away. Always a "try again later" outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectReason {
    DailyLimitExceeded { used: u64, limit: u32 },
    MonthlyLimitExceeded { used: u64, limit: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// The usage check itself could not be completed. Callers must fail closed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("usage check failed: {0}")]
    UsageCheckFailed(String),
}

/// Current usage and allowances for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub service: String,
    pub daily_usage: u64,
    pub monthly_usage: u64,
    pub daily_limit: Limit,
    pub monthly_limit: u32,
    pub subscription: Option<Subscription>,
}

/// Admission guard composing the usage ledger and the plan limiter.
pub struct UsageGate {
    ledger: UsageLedger,
    subscriptions: Arc<dyn SubscriptionSource>,
    limiter: PlanLimiter,
    config: MeteringConfig,
}

impl std::fmt::Debug for UsageGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageGate")
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UsageGate {
    pub fn new(ledger: UsageLedger, subscriptions: Arc<dyn SubscriptionSource>, config: MeteringConfig) -> Self {
        Self {
            ledger,
            subscriptions,
            limiter: config.limiter(),
            config,
        }
    }

    pub fn with_limiter(mut self, limiter: PlanLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Name of the metered service.
    pub fn service(&self) -> &str {
        &self.config.service
    }

    pub async fn admit(&self, user_id: UserId) -> Result<Admission, GateError> {
        self.admit_at(user_id, Utc::now()).await
    }

    pub async fn admit_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Admission, GateError> {
        let report = self.report_at(user_id, now).await?;

        // First use of the day or month is always let through.
        if self.config.first_use_exemption && (report.daily_usage == 0 || report.monthly_usage == 0) {
            debug!(
                user_id = %user_id,
                daily_usage = report.daily_usage,
                monthly_usage = report.monthly_usage,
                "admitted under first-use exemption"
            );
            return Ok(Admission::Admit);
        }

        if let Limit::Finite(limit) = report.daily_limit {
            if report.daily_limit.exceeded_by_next(report.daily_usage) {
                warn!(user_id = %user_id, daily_usage = report.daily_usage, limit, "daily usage limit exceeded");
                return Ok(Admission::Reject(RejectReason::DailyLimitExceeded {
                    used: report.daily_usage,
                    limit,
                }));
            }
        }

        if Limit::Finite(report.monthly_limit).exceeded_by_next(report.monthly_usage) {
            warn!(
                user_id = %user_id,
                monthly_usage = report.monthly_usage,
                limit = report.monthly_limit,
                "monthly plan limit exceeded"
            );
            return Ok(Admission::Reject(RejectReason::MonthlyLimitExceeded {
                used: report.monthly_usage,
                limit: report.monthly_limit,
            }));
        }

        Ok(Admission::Admit)
    }

    pub async fn usage_report(&self, user_id: UserId) -> Result<UsageReport, GateError> {
        self.report_at(user_id, Utc::now()).await
    }

    async fn report_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<UsageReport, GateError> {
        let subscription = self
            .subscriptions
            .subscription(user_id)
            .await
            .map_err(|e| GateError::UsageCheckFailed(e.to_string()))?;

        let status = subscription.map(|s| s.status);
        let amount = subscription.and_then(|s| s.amount);
        let service = self.config.service.as_str();

        let daily_usage = self
            .ledger
            .usage_in(user_id, service, UsageWindow::Day, now)
            .await
            .map_err(|e| GateError::UsageCheckFailed(e.to_string()))?;
        let monthly_usage = self
            .ledger
            .usage_in(user_id, service, UsageWindow::Month, now)
            .await
            .map_err(|e| GateError::UsageCheckFailed(e.to_string()))?;

        Ok(UsageReport {
            service: service.to_string(),
            daily_usage,
            monthly_usage,
            daily_limit: self.limiter.daily_limit(status),
            monthly_limit: self.limiter.monthly_limit(amount, status),
            subscription,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{FREE_DAILY_LIMIT, FREE_MONTHLY_LIMIT, SubscriptionStatus};
    use crate::usage::{InMemoryUsageStore, UsageError, UsageRecord, UsageStore};
    use chrono::Duration;
    use proptest::prelude::*;

    const SERVICE: &str = "chart-analysis";

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-15T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn setup() -> (UsageGate, Arc<StaticSubscriptionSource>) {
        let subs = Arc::new(StaticSubscriptionSource::new());
        let gate = UsageGate::new(
            UsageLedger::new(InMemoryUsageStore::arc()),
            subs.clone(),
            MeteringConfig::default().with_service(SERVICE),
        );
        (gate, subs)
    }

    async fn seed(gate: &UsageGate, user: UserId, n: u64, at: DateTime<Utc>) {
        for _ in 0..n {
            gate.ledger().record_at(user, SERVICE, at).await.unwrap();
        }
    }

    struct FailingStore;

    #[async_trait]
    impl UsageStore for FailingStore {
        async fn insert(&self, _record: UsageRecord) -> Result<(), UsageError> {
            Err(UsageError::Storage("down".into()))
        }
        async fn count_since(&self, _: UserId, _: &str, _: DateTime<Utc>) -> Result<u64, UsageError> {
            Err(UsageError::Storage("down".into()))
        }
        async fn count_total(&self, _: UserId, _: &str) -> Result<u64, UsageError> {
            Err(UsageError::Storage("down".into()))
        }
    }

    struct FailingBilling;

    #[async_trait]
    impl SubscriptionSource for FailingBilling {
        async fn subscription(&self, _: UserId) -> Result<Option<Subscription>, SubscriptionError> {
            Err(SubscriptionError::Lookup("billing unavailable".into()))
        }
    }

    #[tokio::test]
    async fn new_user_is_admitted() {
        let (gate, _) = setup();
        assert_eq!(gate.admit_at(UserId::new(), now()).await.unwrap(), Admission::Admit);
    }

    #[tokio::test]
    async fn free_user_hits_daily_limit() {
        let (gate, _) = setup();
        let user = UserId::new();

        seed(&gate, user, u64::from(FREE_DAILY_LIMIT) - 1, now() - Duration::minutes(5)).await;
        assert!(gate.admit_at(user, now()).await.unwrap().is_admitted());

        seed(&gate, user, 1, now() - Duration::minutes(1)).await;
        assert_eq!(
            gate.admit_at(user, now()).await.unwrap(),
            Admission::Reject(RejectReason::DailyLimitExceeded {
                used: u64::from(FREE_DAILY_LIMIT),
                limit: FREE_DAILY_LIMIT,
            })
        );
    }

    #[tokio::test]
    async fn free_user_hits_monthly_limit_across_days() {
        let (gate, _) = setup();
        let user = UserId::new();

        seed(&gate, user, u64::from(FREE_MONTHLY_LIMIT) - 1, now() - Duration::days(3)).await;
        seed(&gate, user, 1, now() - Duration::hours(1)).await;

        assert_eq!(
            gate.admit_at(user, now()).await.unwrap(),
            Admission::Reject(RejectReason::MonthlyLimitExceeded {
                used: u64::from(FREE_MONTHLY_LIMIT),
                limit: FREE_MONTHLY_LIMIT,
            })
        );
    }

    #[tokio::test]
    async fn top_tier_allows_thousandth_and_rejects_next() {
        let (gate, subs) = setup();
        let user = UserId::new();
        subs.set(user, Subscription::active(2999));

        seed(&gate, user, 999, now() - Duration::minutes(10)).await;
        assert_eq!(gate.admit_at(user, now()).await.unwrap(), Admission::Admit);

        seed(&gate, user, 1, now() - Duration::minutes(1)).await;
        assert_eq!(
            gate.admit_at(user, now()).await.unwrap(),
            Admission::Reject(RejectReason::MonthlyLimitExceeded { used: 1000, limit: 1000 })
        );
    }

    #[tokio::test]
    async fn inactive_paid_plan_falls_back_to_free_limits() {
        let (gate, subs) = setup();
        let user = UserId::new();
        subs.set(user, Subscription::new(2999, SubscriptionStatus::PastDue));

        let report = gate.report_at(user, now()).await.unwrap();
        assert_eq!(report.monthly_limit, FREE_MONTHLY_LIMIT);
        assert_eq!(report.daily_limit, Limit::Finite(FREE_DAILY_LIMIT));
    }

    #[tokio::test]
    async fn yesterday_usage_only_is_exempt_today() {
        let (gate, _) = setup();
        let user = UserId::new();

        // Monthly count is high but nothing today: first-use exemption applies.
        seed(&gate, user, u64::from(FREE_MONTHLY_LIMIT) + 5, now() - Duration::days(1)).await;
        assert_eq!(gate.admit_at(user, now()).await.unwrap(), Admission::Admit);
    }

    #[tokio::test]
    async fn exemption_can_be_disabled() {
        let subs = Arc::new(StaticSubscriptionSource::new());
        let gate = UsageGate::new(
            UsageLedger::new(InMemoryUsageStore::arc()),
            subs,
            MeteringConfig::default()
                .with_service(SERVICE)
                .with_free_limits(0, 0)
                .with_first_use_exemption(false),
        );

        let decision = gate.admit_at(UserId::new(), now()).await.unwrap();
        assert!(matches!(decision, Admission::Reject(RejectReason::DailyLimitExceeded { used: 0, limit: 0 })));
    }

    #[tokio::test]
    async fn storage_failure_fails_closed() {
        let gate = UsageGate::new(
            UsageLedger::new(Arc::new(FailingStore)),
            Arc::new(StaticSubscriptionSource::new()),
            MeteringConfig::default(),
        );

        let err = gate.admit_at(UserId::new(), now()).await.unwrap_err();
        assert!(matches!(err, GateError::UsageCheckFailed(_)));
    }

    #[tokio::test]
    async fn billing_failure_fails_closed() {
        let gate = UsageGate::new(
            UsageLedger::new(InMemoryUsageStore::arc()),
            Arc::new(FailingBilling),
            MeteringConfig::default(),
        );

        let err = gate.admit_at(UserId::new(), now()).await.unwrap_err();
        assert_eq!(err, GateError::UsageCheckFailed("subscription lookup failed: billing unavailable".into()));
    }

    #[tokio::test]
    async fn subscription_table_survives_a_poisoned_lock() {
        let subs = Arc::new(StaticSubscriptionSource::from_entries([(UserId::new(), Subscription::active(699))]));
        let user = UserId::new();

        let poisoner = subs.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("writer died mid-update");
        })
        .join();
        assert!(subs.inner.is_poisoned());

        subs.set(user, Subscription::active(2999));
        assert_eq!(subs.len(), 2);
        assert_eq!(subs.subscription(user).await.unwrap(), Some(Subscription::active(2999)));

        subs.remove(user);
        assert_eq!(subs.subscription(user).await.unwrap(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn zero_usage_in_either_window_always_admits(
            price in proptest::option::of(prop_oneof![Just(699i64), Just(2399), Just(2999), any::<i64>()]),
            active in any::<bool>(),
            older in 0u64..40,
            today_zero in any::<bool>(),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (gate, subs) = setup();
                let user = UserId::new();
                if let Some(amount) = price {
                    let status = if active { SubscriptionStatus::Active } else { SubscriptionStatus::Canceled };
                    subs.set(user, Subscription::new(amount, status));
                }

                if today_zero {
                    // Only last month's usage: daily and monthly counts are both zero.
                    seed(&gate, user, older, now() - Duration::days(45)).await;
                } else {
                    // Earlier this month but not today: daily count is zero.
                    seed(&gate, user, older, now() - Duration::days(2)).await;
                }

                prop_assert_eq!(gate.admit_at(user, now()).await.unwrap(), Admission::Admit);
                Ok(())
            })?;
        }
    }
}
