//! # tienda-db: Storage Layer for Tienda POS
//!
//! The transactional catalog store, history ledger, customer directory,
//! local durable cache and image cleanup outbox, all on SQLite via sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tienda POS Data Flow                             │
//! │                                                                         │
//! │  tienda-engine (Committer, SessionManager, RetryManager)                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    tienda-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ CatalogRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ ProductRepo    │    │ 001_initial  │  │   │
//! │  │   │ CatalogEvent  │    │ LedgerRepo     │    │  _schema.sql │  │   │
//! │  │   │  broadcast    │    │ CustomerRepo   │    │              │  │   │
//! │  │   │               │    │ LocalCacheRepo │    │              │  │   │
//! │  │   │               │    │ OutboxRepo     │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and the catalog change feed
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tienda_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("tienda.db")).await?;
//! let snapshot = db.catalog().load_snapshot().await?;
//! let outcome = db.ledger().commit(&plan).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cache::LocalCacheRepository;
pub use repository::catalog::CatalogRepository;
pub use repository::customer::CustomerRepository;
pub use repository::ledger::{HistoryFilter, HistorySummary, LedgerRepository};
pub use repository::outbox::{JobStatus, OutboxJob, OutboxRepository};
pub use repository::product::{ProductDraft, ProductRepository};
