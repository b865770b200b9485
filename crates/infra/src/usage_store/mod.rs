//! Durable [`UsageStore`](jobgate_metering::usage::UsageStore) backends.

pub mod postgres;

pub use postgres::PostgresUsageStore;
