//! Postgres-backed usage store.
//!
//! Records live in the append-only `service_usage` table. Rows are only inserted and
//! counted; retention is handled outside jobgate.
//!
//! ## Error Mapping
//!
//! Every SQLx error becomes `UsageError::Storage` with the failing operation in the message,
//! so a failed count is never mistaken for a count of zero.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use jobgate_core::UserId;
use jobgate_metering::usage::{UsageError, UsageRecord, UsageStore};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS service_usage (
    id          UUID PRIMARY KEY,
    user_id     UUID NOT NULL,
    service     TEXT NOT NULL,
    usage_date  TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS service_usage_user_service_date
    ON service_usage (user_id, service, usage_date)
"#;

/// Postgres-backed append-only usage store.
#[derive(Debug, Clone)]
pub struct PostgresUsageStore {
    pool: Arc<PgPool>,
}

impl PostgresUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` with a small pool.
    pub async fn connect(database_url: &str) -> Result<Self, UsageError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table and its lookup index if missing.
    pub async fn ensure_schema(&self) -> Result<(), UsageError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_table", e))?;
        sqlx::query(CREATE_INDEX)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_index", e))?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for PostgresUsageStore {
    #[instrument(skip(self, record), fields(user_id = %record.user_id, service = %record.service), err)]
    async fn insert(&self, record: UsageRecord) -> Result<(), UsageError> {
        sqlx::query(
            r#"
            INSERT INTO service_usage (id, user_id, service, usage_date)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id.as_uuid())
        .bind(&record.service)
        .bind(record.usage_date)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_usage", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn count_since(&self, user_id: UserId, service: &str, since: DateTime<Utc>) -> Result<u64, UsageError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS used
            FROM service_usage
            WHERE user_id = $1 AND service = $2 AND usage_date >= $3
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(service)
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_since", e))?;

        read_count(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn count_total(&self, user_id: UserId, service: &str) -> Result<u64, UsageError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS used
            FROM service_usage
            WHERE user_id = $1 AND service = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(service)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_total", e))?;

        read_count(&row)
    }
}

fn read_count(row: &sqlx::postgres::PgRow) -> Result<u64, UsageError> {
    let used: i64 = row
        .try_get("used")
        .map_err(|e| UsageError::Storage(format!("failed to read usage count: {e}")))?;
    u64::try_from(used).map_err(|_| UsageError::Storage(format!("negative usage count: {used}")))
}

/// Map SQLx errors to UsageError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> UsageError {
    match err {
        sqlx::Error::Database(db_err) => {
            UsageError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => UsageError::Storage(format!("connection pool closed in {}", operation)),
        sqlx::Error::PoolTimedOut => UsageError::Storage(format!("connection pool timed out in {}", operation)),
        _ => UsageError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_storage() {
        let err = map_sqlx_error("count_since", sqlx::Error::PoolClosed);
        assert_eq!(err, UsageError::Storage("connection pool closed in count_since".to_string()));
    }

    #[test]
    fn schema_is_append_only_table() {
        assert!(CREATE_TABLE.contains("service_usage"));
        assert!(CREATE_INDEX.contains("(user_id, service, usage_date)"));
    }
}
