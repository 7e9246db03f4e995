//! # Ledger Repository
//!
//! Sales, purchases and transfers land here as one atomic transaction each:
//! stock deltas, the history record and (for sales) the customer directory
//! merge.
//!
//! ## Commit Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   │                                                                     │
//! │   ├─ SELECT history WHERE op_id = ?  ── found ──► ROLLBACK              │
//! │   │                                              AlreadyApplied         │
//! │   ├─ for each delta:                                                    │
//! │   │     delta < 0 → UPDATE ... WHERE quantity + delta >= 0              │
//! │   │                 0 rows → ROLLBACK, InsufficientStock                │
//! │   │     delta > 0 → INSERT ... ON CONFLICT DO UPDATE quantity + delta   │
//! │   │                                                                     │
//! │   ├─ INSERT history (payload = HistoryRecord JSON)                      │
//! │   │                                                                     │
//! │   ├─ SAVEPOINT customer merge  ── fails ──► warn!, release savepoint    │
//! │   │                                                                     │
//! │  COMMIT ──► publish InventoryUpserted for every touched inventory       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock can never go negative: the conditional decrement and the
//! `CHECK (quantity >= 0)` on `inventory_stock` both refuse it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, Row, SqliteConnection, SqlitePool};
use tienda_core::{CatalogEvent, CommitOutcome, CommitPlan, HistoryRecord, OperationKind, StockDelta};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::catalog::{current_quantity, publish_inventories};
use super::customer::upsert_in;
use crate::error::{DbError, DbResult};

/// Default page size for history listings.
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

// =============================================================================
// Reporting Types
// =============================================================================

/// History query: optional kind and half-open `[from, to)` date range.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFilter {
    pub kind: Option<OperationKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        HistoryFilter {
            kind: None,
            from: None,
            to: None,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HistoryFilter {
    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Summed report over a filtered range. Refunded operations are counted but
/// excluded from the totals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub operations: i64,
    pub refunded: i64,
    pub total_usd: f64,
    pub total_bs: i64,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the history ledger.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
    events: broadcast::Sender<CatalogEvent>,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool, events: broadcast::Sender<CatalogEvent>) -> Self {
        LedgerRepository { pool, events }
    }

    /// Applies a commit plan atomically.
    ///
    /// ## Returns
    /// - `Applied` when the deltas and the record were written
    /// - `AlreadyApplied` when a record with the same op id exists; nothing
    ///   is written
    ///
    /// ## Errors
    /// `DbError::InsufficientStock` if any decrement would go below zero.
    /// Nothing is written in that case either.
    pub async fn commit(&self, plan: &CommitPlan) -> DbResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        if history_exists(&mut tx, &plan.op_id).await? {
            tx.rollback().await?;
            info!(op_id = %plan.op_id, kind = %plan.kind, "Operation already applied");
            return Ok(CommitOutcome::AlreadyApplied);
        }

        apply_deltas(&mut tx, &plan.deltas).await?;
        insert_history(&mut tx, &plan.record).await?;

        if let Some(customer) = &plan.customer {
            match tx.begin().await {
                Ok(mut savepoint) => match upsert_in(&mut savepoint, customer).await {
                    Ok(()) => {
                        if let Err(e) = savepoint.commit().await {
                            warn!(national_id = %customer.national_id, error = %e, "Customer merge not released");
                        }
                    }
                    Err(e) => {
                        warn!(national_id = %customer.national_id, error = %e, "Customer merge failed");
                        if let Err(e) = savepoint.rollback().await {
                            warn!(error = %e, "Customer savepoint rollback failed");
                        }
                    }
                },
                Err(e) => {
                    warn!(national_id = %customer.national_id, error = %e, "Customer savepoint unavailable");
                }
            }
        }

        tx.commit().await?;

        info!(
            op_id = %plan.op_id,
            kind = %plan.kind,
            deltas = plan.deltas.len(),
            "Operation committed"
        );

        self.publish_touched(&plan.deltas).await;
        Ok(CommitOutcome::Applied)
    }

    /// Whether a record with this op id exists.
    pub async fn exists(&self, op_id: &str) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        history_exists(&mut conn, op_id).await
    }

    /// One history record.
    pub async fn get(&self, op_id: &str) -> DbResult<Option<HistoryRecord>> {
        let row = sqlx::query("SELECT payload, refunded, refunded_at FROM history WHERE op_id = ?1")
            .bind(op_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Reverses a stock-moving operation.
    ///
    /// ## What This Does
    /// 1. Loads the record; only sales, purchases and transfers qualify
    /// 2. Applies every original delta negated
    /// 3. Flags the record `refunded` with a timestamp
    ///
    /// All three steps share one transaction. Refunding a purchase whose
    /// units were sold since fails with `InsufficientStock`.
    pub async fn refund(&self, op_id: &str) -> DbResult<HistoryRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT payload, refunded, refunded_at FROM history WHERE op_id = ?1")
            .bind(op_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("History", op_id))?;
        let mut record = record_from_row(&row)?;

        if !matches!(
            record.kind,
            OperationKind::Sale | OperationKind::Purchase | OperationKind::Transfer
        ) {
            return Err(DbError::NotRefundable(op_id.to_string()));
        }
        if record.refunded {
            return Err(DbError::AlreadyRefunded(op_id.to_string()));
        }

        let reversed: Vec<StockDelta> = record.deltas.iter().map(StockDelta::reversed).collect();
        apply_deltas(&mut tx, &reversed).await?;

        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE history SET refunded = 1, refunded_at = ?2 WHERE op_id = ?1 AND refunded = 0",
        )
        .bind(op_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DbError::AlreadyRefunded(op_id.to_string()));
        }

        tx.commit().await?;
        info!(op_id = %op_id, kind = %record.kind, "Operation refunded");

        record.refunded = true;
        record.refunded_at = Some(now);
        self.publish_touched(&reversed).await;
        Ok(record)
    }

    /// History matching a filter, newest first.
    pub async fn list(&self, filter: &HistoryFilter) -> DbResult<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT payload, refunded, refunded_at
            FROM history
            WHERE (?1 IS NULL OR kind = ?1)
              AND (?2 IS NULL OR created_at >= ?2)
              AND (?3 IS NULL OR created_at < ?3)
            ORDER BY created_at DESC, op_id
            LIMIT ?4
            "#,
        )
        .bind(filter.kind)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(rows = rows.len(), "History listed");
        rows.iter().map(record_from_row).collect()
    }

    /// Counts and sums over a filter (the limit is ignored).
    pub async fn summary(&self, filter: &HistoryFilter) -> DbResult<HistorySummary> {
        let (operations, refunded, total_usd, total_bs): (i64, i64, f64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                CAST(COALESCE(SUM(refunded), 0) AS INTEGER),
                CAST(COALESCE(SUM(CASE WHEN refunded = 0 THEN total_usd ELSE 0 END), 0) AS REAL),
                CAST(COALESCE(SUM(CASE WHEN refunded = 0 THEN total_bs ELSE 0 END), 0) AS INTEGER)
            FROM history
            WHERE (?1 IS NULL OR kind = ?1)
              AND (?2 IS NULL OR created_at >= ?2)
              AND (?3 IS NULL OR created_at < ?3)
            "#,
        )
        .bind(filter.kind)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await?;

        Ok(HistorySummary {
            operations,
            refunded,
            total_usd,
            total_bs,
        })
    }

    async fn publish_touched(&self, deltas: &[StockDelta]) {
        let touched: BTreeSet<&str> = deltas.iter().map(|d| d.inventory_id.as_str()).collect();
        if let Err(e) = publish_inventories(&self.pool, &self.events, touched).await {
            warn!(error = %e, "Failed to publish inventory changes");
        }
    }
}

// =============================================================================
// Transaction Steps
// =============================================================================

pub(crate) async fn history_exists(conn: &mut SqliteConnection, op_id: &str) -> DbResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM history WHERE op_id = ?1")
        .bind(op_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Applies stock deltas in order. Any refused decrement aborts with
/// `InsufficientStock`; the caller's transaction is dropped and rolls back.
pub(crate) async fn apply_deltas(conn: &mut SqliteConnection, deltas: &[StockDelta]) -> DbResult<()> {
    let now = Utc::now();
    for delta in deltas {
        if delta.delta < 0 {
            let result = sqlx::query(
                r#"
                UPDATE inventory_stock
                SET quantity = quantity + ?3, updated_at = ?4
                WHERE inventory_id = ?1 AND product_id = ?2 AND quantity + ?3 >= 0
                "#,
            )
            .bind(&delta.inventory_id)
            .bind(&delta.product_id)
            .bind(delta.delta)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                let available =
                    current_quantity(conn, &delta.inventory_id, &delta.product_id).await?;
                warn!(
                    inventory_id = %delta.inventory_id,
                    product_id = %delta.product_id,
                    available,
                    requested = -delta.delta,
                    "Decrement refused"
                );
                return Err(DbError::InsufficientStock {
                    inventory: delta.inventory_id.clone(),
                    product: delta.product_name.clone(),
                    available,
                    requested: -delta.delta,
                });
            }
        } else if delta.delta > 0 {
            sqlx::query(
                r#"
                INSERT INTO inventory_stock (inventory_id, product_id, quantity, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(inventory_id, product_id) DO UPDATE SET
                    quantity = quantity + excluded.quantity,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&delta.inventory_id)
            .bind(&delta.product_id)
            .bind(delta.delta)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        debug!(
            inventory_id = %delta.inventory_id,
            product_id = %delta.product_id,
            delta = delta.delta,
            "Stock delta applied"
        );
    }
    Ok(())
}

pub(crate) async fn insert_history(conn: &mut SqliteConnection, record: &HistoryRecord) -> DbResult<()> {
    let payload = serde_json::to_string(record)?;
    sqlx::query(
        r#"
        INSERT INTO history (
            op_id, kind, business_id, user_id, inventory_id, destination_inventory_id,
            total_usd, total_bs, payload, refunded, refunded_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&record.op_id)
    .bind(record.kind)
    .bind(&record.business_id)
    .bind(&record.user_id)
    .bind(&record.inventory_id)
    .bind(&record.destination_inventory_id)
    .bind(record.totals.usd)
    .bind(record.totals.bs)
    .bind(payload)
    .bind(record.refunded)
    .bind(record.refunded_at)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> DbResult<HistoryRecord> {
    let payload: String = row.try_get("payload")?;
    let mut record: HistoryRecord = serde_json::from_str(&payload)?;
    record.refunded = row.try_get("refunded")?;
    record.refunded_at = row.try_get("refunded_at")?;
    Ok(record)
}

// =============================================================================
// Unit Tests
// =============================================================================
