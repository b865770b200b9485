//! Postgres-backed subscription snapshots.
//!
//! The billing sync upserts one row per user into `user_subscriptions`; the gate only reads.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use jobgate_core::UserId;
use jobgate_metering::{Subscription, SubscriptionError, SubscriptionSource, SubscriptionStatus};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_subscriptions (
    user_id     UUID PRIMARY KEY,
    amount      BIGINT,
    status      TEXT NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

#[derive(Debug, Clone)]
pub struct PostgresSubscriptionSource {
    pool: Arc<PgPool>,
}

impl PostgresSubscriptionSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), SubscriptionError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_table", e))?;
        Ok(())
    }

    /// Insert or replace the snapshot for one user.
    #[instrument(skip(self, subscription), fields(user_id = %user_id), err)]
    pub async fn upsert(&self, user_id: UserId, subscription: Subscription) -> Result<(), SubscriptionError> {
        sqlx::query(
            r#"
            INSERT INTO user_subscriptions (user_id, amount, status, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (user_id) DO UPDATE
                SET amount = EXCLUDED.amount, status = EXCLUDED.status, updated_at = now()
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(subscription.amount)
        .bind(subscription.status.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_subscription", e))?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionSource for PostgresSubscriptionSource {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn subscription(&self, user_id: UserId) -> Result<Option<Subscription>, SubscriptionError> {
        let row = sqlx::query(
            r#"
            SELECT amount, status
            FROM user_subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_subscription", e))?;

        row.map(|row| read_subscription(&row)).transpose()
    }
}

fn read_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription, SubscriptionError> {
    let amount: Option<i64> = row
        .try_get("amount")
        .map_err(|e| SubscriptionError::Lookup(format!("failed to read amount: {e}")))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| SubscriptionError::Lookup(format!("failed to read status: {e}")))?;
    let status: SubscriptionStatus = status.parse().map_err(SubscriptionError::Lookup)?;

    Ok(Subscription { amount, status })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SubscriptionError {
    match err {
        sqlx::Error::Database(db_err) => {
            SubscriptionError::Lookup(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => SubscriptionError::Lookup(format!("connection pool closed in {}", operation)),
        sqlx::Error::PoolTimedOut => SubscriptionError::Lookup(format!("connection pool timed out in {}", operation)),
        _ => SubscriptionError::Lookup(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_lookup_failures() {
        let err = map_sqlx_error("get_subscription", sqlx::Error::PoolTimedOut);
        assert_eq!(
            err,
            SubscriptionError::Lookup("connection pool timed out in get_subscription".to_string())
        );
    }

    #[test]
    fn one_row_per_user() {
        assert!(CREATE_TABLE.contains("user_id     UUID PRIMARY KEY"));
    }
}
