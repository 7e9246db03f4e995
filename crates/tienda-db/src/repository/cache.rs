//! # Local Cache Repository
//!
//! Durable key/value storage for session snapshots and pending operation
//! ids. Values are opaque JSON strings; there is no TTL.
//!
//! ## Keys In Use
//! ```text
//! cashier:state:{user}                 SessionCachePayload
//! buys:state:{user}                    SessionCachePayload
//! transfers:state:{user}               SessionCachePayload
//! {kind}:pending:{entity}:{user}       PendingOperation
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// Repository for the local durable cache.
#[derive(Debug, Clone)]
pub struct LocalCacheRepository {
    pool: SqlitePool,
}

impl LocalCacheRepository {
    /// Creates a new LocalCacheRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LocalCacheRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM local_cache WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO local_cache (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(key = %key, bytes = value.len(), "Cache entry written");
        Ok(())
    }

    /// Removes a key. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM local_cache WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Keys starting with `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> DbResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT key FROM local_cache WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}
