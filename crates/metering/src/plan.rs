//! Subscription snapshots and plan allowances.

use serde::{Deserialize, Serialize};

/// Free-tier daily ceiling (applies whenever the subscription is not active).
pub const FREE_DAILY_LIMIT: u32 = 3;

/// Monthly allowance for unrecognized, absent, or inactive plans.
pub const FREE_MONTHLY_LIMIT: u32 = 10;

/// Billing-provider subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Ok(SubscriptionStatus::IncompleteExpired),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            "paused" => Ok(SubscriptionStatus::Paused),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// Read-only snapshot returned by the subscription lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Plan price in the smallest currency unit; used as the tier key.
    pub amount: Option<i64>,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn new(amount: i64, status: SubscriptionStatus) -> Self {
        Self {
            amount: Some(amount),
            status,
        }
    }

    pub fn active(amount: i64) -> Self {
        Self::new(amount, SubscriptionStatus::Active)
    }
}

/// A usage ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Limit {
    Finite(u32),
    Unlimited,
}

impl Limit {
    /// Would one more use exceed this limit?
    pub fn exceeded_by_next(&self, used: u64) -> bool {
        match self {
            Limit::Finite(max) => used >= u64::from(*max),
            Limit::Unlimited => false,
        }
    }
}

/// A paid tier: exact plan price → monthly allowance while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTier {
    pub price: i64,
    pub monthly_limit: u32,
}

/// Maps subscription price/status to allowances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanLimiter {
    free_daily_limit: u32,
    free_monthly_limit: u32,
    tiers: Vec<PlanTier>,
}

impl Default for PlanLimiter {
    fn default() -> Self {
        Self::new(FREE_DAILY_LIMIT, FREE_MONTHLY_LIMIT)
    }
}

impl PlanLimiter {
    /// Limiter with the standard paid tiers and the given free-tier ceilings.
    pub fn new(free_daily_limit: u32, free_monthly_limit: u32) -> Self {
        Self {
            free_daily_limit,
            free_monthly_limit,
            tiers: Self::standard_tiers(),
        }
    }

    pub fn standard_tiers() -> Vec<PlanTier> {
        vec![
            PlanTier { price: 699, monthly_limit: 100 },
            PlanTier { price: 2399, monthly_limit: 500 },
            PlanTier { price: 2999, monthly_limit: 1000 },
        ]
    }

    pub fn with_tiers(mut self, tiers: Vec<PlanTier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn free_daily_limit(&self) -> u32 {
        self.free_daily_limit
    }

    pub fn free_monthly_limit(&self) -> u32 {
        self.free_monthly_limit
    }

    /// Free ceiling unless active; active subscribers have no daily cap.
    pub fn daily_limit(&self, status: Option<SubscriptionStatus>) -> Limit {
        match status {
            Some(s) if s.is_active() => Limit::Unlimited,
            _ => Limit::Finite(self.free_daily_limit),
        }
    }

    /// Exact-price table lookup. Unknown or missing prices degrade to the free allowance
    /// regardless of status.
    pub fn monthly_limit(&self, plan_price: Option<i64>, status: Option<SubscriptionStatus>) -> u32 {
        let active = status.is_some_and(|s| s.is_active());
        plan_price
            .and_then(|price| self.tiers.iter().find(|t| t.price == price))
            .filter(|_| active)
            .map_or(self.free_monthly_limit, |t| t.monthly_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const INACTIVE: [SubscriptionStatus; 7] = [
        SubscriptionStatus::Trialing,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Incomplete,
        SubscriptionStatus::IncompleteExpired,
        SubscriptionStatus::Unpaid,
        SubscriptionStatus::Paused,
    ];

    #[test]
    fn active_tiers_match_table() {
        let limiter = PlanLimiter::default();
        let active = Some(SubscriptionStatus::Active);

        assert_eq!(limiter.monthly_limit(Some(699), active), 100);
        assert_eq!(limiter.monthly_limit(Some(2399), active), 500);
        assert_eq!(limiter.monthly_limit(Some(2999), active), 1000);
    }

    #[test]
    fn unknown_or_missing_price_is_free_even_when_active() {
        let limiter = PlanLimiter::default();
        let active = Some(SubscriptionStatus::Active);

        assert_eq!(limiter.monthly_limit(Some(1234), active), FREE_MONTHLY_LIMIT);
        assert_eq!(limiter.monthly_limit(None, active), FREE_MONTHLY_LIMIT);
        assert_eq!(limiter.monthly_limit(None, None), FREE_MONTHLY_LIMIT);
    }

    #[test]
    fn daily_limit_only_for_non_active() {
        let limiter = PlanLimiter::new(5, 50);

        assert_eq!(limiter.daily_limit(Some(SubscriptionStatus::Active)), Limit::Unlimited);
        assert_eq!(limiter.daily_limit(Some(SubscriptionStatus::PastDue)), Limit::Finite(5));
        assert_eq!(limiter.daily_limit(None), Limit::Finite(5));
    }

    #[test]
    fn limit_exceeded_by_next() {
        assert!(!Limit::Finite(3).exceeded_by_next(2));
        assert!(Limit::Finite(3).exceeded_by_next(3));
        assert!(!Limit::Unlimited.exceeded_by_next(u64::MAX - 1));
    }

    #[test]
    fn status_names_parse_back() {
        for status in INACTIVE.into_iter().chain([SubscriptionStatus::Active]) {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>(), Ok(status));
        }
        assert!("lapsed".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn saturated_counter_is_over_any_finite_limit() {
        assert!(Limit::Finite(u32::MAX).exceeded_by_next(u64::MAX));
        assert!(Limit::Finite(0).exceeded_by_next(0));
        assert!(!Limit::Unlimited.exceeded_by_next(u64::MAX));
    }

    proptest! {
        #[test]
        fn inactive_status_always_gets_free_monthly(price in proptest::option::of(any::<i64>()), idx in 0usize..7) {
            let limiter = PlanLimiter::default();
            prop_assert_eq!(limiter.monthly_limit(price, Some(INACTIVE[idx])), FREE_MONTHLY_LIMIT);
            prop_assert_eq!(limiter.monthly_limit(price, None), FREE_MONTHLY_LIMIT);
        }

        #[test]
        fn unrecognized_price_always_gets_free_monthly(price in any::<i64>()) {
            prop_assume!(![699, 2399, 2999].contains(&price));
            let limiter = PlanLimiter::default();
            prop_assert_eq!(limiter.monthly_limit(Some(price), Some(SubscriptionStatus::Active)), FREE_MONTHLY_LIMIT);
        }
    }
}
