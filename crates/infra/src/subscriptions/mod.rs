//! [`SubscriptionSource`](jobgate_metering::SubscriptionSource) backends.

pub mod file;
pub mod postgres;

pub use file::{load_subscriptions, parse_subscriptions};
pub use postgres::PostgresSubscriptionSource;
