//! Metering configuration.

use crate::plan::{FREE_DAILY_LIMIT, FREE_MONTHLY_LIMIT, PlanLimiter};

/// Metering configuration for one metered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeteringConfig {
    /// Service/queue name that usage is counted against.
    pub service: String,
    pub free_daily_limit: u32,
    pub free_monthly_limit: u32,
    /// Admit unconditionally while the user's daily or monthly count is zero.
    ///
    /// Kept for parity with production behavior; pending product-owner confirmation.
    pub first_use_exemption: bool,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            service: "chart-analysis".to_string(),
            free_daily_limit: FREE_DAILY_LIMIT,
            free_monthly_limit: FREE_MONTHLY_LIMIT,
            first_use_exemption: true,
        }
    }
}

impl MeteringConfig {
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_free_limits(mut self, daily: u32, monthly: u32) -> Self {
        self.free_daily_limit = daily;
        self.free_monthly_limit = monthly;
        self
    }

    pub fn with_first_use_exemption(mut self, enabled: bool) -> Self {
        self.first_use_exemption = enabled;
        self
    }

    pub fn limiter(&self) -> PlanLimiter {
        PlanLimiter::new(self.free_daily_limit, self.free_monthly_limit)
    }
}
