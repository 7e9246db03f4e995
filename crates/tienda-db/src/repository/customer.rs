//! # Customer Repository
//!
//! Customer directory keyed by the normalized national id. Sales merge the
//! customer's name, phone and address in; notes and payment method are never
//! stored here.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tienda_core::commit::CustomerRecord;
use tienda_core::validation::normalize_national_id;
use tracing::debug;

use crate::error::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
struct CustomerRow {
    national_id: String,
    name: String,
    phone: String,
    address: String,
}

impl From<CustomerRow> for CustomerRecord {
    fn from(row: CustomerRow) -> Self {
        CustomerRecord {
            national_id: row.national_id,
            name: row.name,
            phone: row.phone,
            address: row.address,
        }
    }
}

/// Repository for the customer directory.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Looks a customer up by national id (normalized before lookup).
    pub async fn get(&self, national_id: &str) -> DbResult<Option<CustomerRecord>> {
        let key = normalize_national_id(national_id);
        let row = sqlx::query_as::<_, CustomerRow>(
            "SELECT national_id, name, phone, address FROM customers WHERE national_id = ?1",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CustomerRecord::from))
    }

    /// All customers, most recently updated first.
    pub async fn list(&self, limit: u32) -> DbResult<Vec<CustomerRecord>> {
        let rows = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT national_id, name, phone, address
            FROM customers
            ORDER BY updated_at DESC, national_id
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CustomerRecord::from).collect())
    }

    /// Inserts or merges a customer outside of a sale.
    pub async fn upsert(&self, record: &CustomerRecord) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_in(&mut conn, record).await
    }
}

/// Merge a customer on an existing connection or transaction.
///
/// Blank incoming fields keep what the directory already has.
pub(crate) async fn upsert_in(conn: &mut SqliteConnection, record: &CustomerRecord) -> DbResult<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO customers (national_id, name, phone, address, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(national_id) DO UPDATE SET
            name = CASE WHEN excluded.name <> '' THEN excluded.name ELSE customers.name END,
            phone = CASE WHEN excluded.phone <> '' THEN excluded.phone ELSE customers.phone END,
            address = CASE WHEN excluded.address <> '' THEN excluded.address ELSE customers.address END,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.national_id)
    .bind(&record.name)
    .bind(&record.phone)
    .bind(&record.address)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(national_id = %record.national_id, "Customer merged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn record(id: &str, name: &str, phone: &str) -> CustomerRecord {
        CustomerRecord {
            national_id: id.to_string(),
            name: name.to_string(),
            phone: phone.to_string(),
            address: String::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_merges_by_national_id() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let customers = db.customers();

        customers
            .upsert(&record("V12345678", "Ana", "0414-1234567"))
            .await
            .unwrap();
        customers.upsert(&record("V12345678", "Ana María", "")).await.unwrap();

        let stored = customers.get("v-12.345.678").await.unwrap().unwrap();
        assert_eq!(stored.name, "Ana María");
        assert_eq!(stored.phone, "0414-1234567");
        assert_eq!(customers.list(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_customer() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.customers().get("E999").await.unwrap().is_none());
    }
}
