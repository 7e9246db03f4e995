//! # Outbox Repository
//!
//! Deferred image cleanup. Deleting a product that has an image enqueues a
//! job in the same transaction; an external worker drains the queue.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ProductRepository::delete                                              │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  DELETE FROM products / inventory_stock                         │   │
//! │  │  INSERT INTO history (product_delete)                           │   │
//! │  │  INSERT INTO outbox_jobs (status = 'pending')                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  worker: pending(limit) → delete image → mark_done / mark_failed        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DbResult;

/// Lifecycle of an outbox job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
}

/// One image cleanup job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OutboxJob {
    pub id: String,
    pub product_id: String,
    pub url: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Repository for outbox jobs.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Enqueues a cleanup job outside of a product delete.
    pub async fn enqueue(&self, product_id: &str, url: &str) -> DbResult<OutboxJob> {
        let mut conn = self.pool.acquire().await?;
        enqueue_in(&mut conn, product_id, url).await
    }

    /// Jobs still waiting, oldest first. Failed jobs are retried too.
    pub async fn pending(&self, limit: u32) -> DbResult<Vec<OutboxJob>> {
        let jobs = sqlx::query_as::<_, OutboxJob>(
            r#"
            SELECT id, product_id, url, status, attempts, last_error, created_at, processed_at
            FROM outbox_jobs
            WHERE status IN ('pending', 'failed')
            ORDER BY created_at ASC, id
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn mark_done(&self, id: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_jobs SET
                status = 'done',
                attempts = attempts + 1,
                last_error = NULL,
                processed_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(id = %id, "Outbox job done");
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_jobs SET
                status = 'failed',
                attempts = attempts + 1,
                last_error = ?2,
                processed_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        warn!(id = %id, error = %error, "Outbox job failed");
        Ok(())
    }

    /// Number of jobs not yet done.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_jobs WHERE status <> 'done'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// Inserts a pending job on an existing connection or transaction.
pub(crate) async fn enqueue_in(
    conn: &mut SqliteConnection,
    product_id: &str,
    url: &str,
) -> DbResult<OutboxJob> {
    let job = OutboxJob {
        id: Uuid::new_v4().to_string(),
        product_id: product_id.to_string(),
        url: url.to_string(),
        status: JobStatus::Pending,
        attempts: 0,
        last_error: None,
        created_at: Utc::now(),
        processed_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO outbox_jobs (id, product_id, url, status, attempts, created_at)
        VALUES (?1, ?2, ?3, ?4, 0, ?5)
        "#,
    )
    .bind(&job.id)
    .bind(&job.product_id)
    .bind(&job.url)
    .bind(job.status)
    .bind(job.created_at)
    .execute(&mut *conn)
    .await?;

    debug!(id = %job.id, product_id = %product_id, "Outbox job enqueued");
    Ok(job)
}
