//! `jobgate-metering`
//!
//! **Responsibility:** per-user usage metering and quota admission.
//!
//! - `usage`: the append-only usage ledger and its storage seam.
//! - `plan`: subscription snapshots and the plan → allowance table.
//! - `gate`: the admission decision composed from both.
//!
//! This crate decides; it never enqueues work and never records usage on its own.

pub mod config;
pub mod gate;
pub mod plan;
pub mod usage;

pub use config::MeteringConfig;
pub use gate::{
    Admission, GateError, RejectReason, StaticSubscriptionSource, SubscriptionError, SubscriptionSource,
    UsageGate, UsageReport,
};
pub use plan::{FREE_DAILY_LIMIT, FREE_MONTHLY_LIMIT, Limit, PlanLimiter, PlanTier, Subscription, SubscriptionStatus};
pub use usage::{InMemoryUsageStore, UsageError, UsageLedger, UsageRecord, UsageStore, UsageWindow};
