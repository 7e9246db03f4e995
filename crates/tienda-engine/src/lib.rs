//! # tienda-engine: Screen Orchestration for Tienda POS
//!
//! Async pieces that sit between a Cashier, Buys or Transfers screen and
//! its stores: two-phase session restore, guarded session writes, the
//! commit pipeline, the retry cycle and the toast slot.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               Screen                                    │
//! │                                                                         │
//! │   TabSet ◄──── SessionManager ◄──── LocalCache (session, markers)       │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │   TransactionCommitter ──► IdempotencyGuard                             │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │   RetryableOperation ──► RetryManager ──► Notifier (single slot)        │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │   CatalogStore (snapshot, events, read_stock, commit)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`screen`] - The per-screen façade
//! - [`session`] - Quick load, reconciliation and guarded writes
//! - [`committer`] - Validation, pre-flight, plan, post-commit
//! - [`retry`] - Countdown retry cycle
//! - [`idempotency`] - Pending op-id markers
//! - [`notify`] - Toast slot with dismiss timer
//! - [`maintenance`] - Product create/edit/delete with audit and retry
//! - [`store`] - `CatalogStore` / `LocalCache` / `CatalogAdmin` seams
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Engine error type
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use tienda_core::ScreenKind;
//! use tienda_db::{Database, DbConfig};
//! use tienda_engine::{EngineConfig, Screen};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::load_or_default(None);
//! let db = Arc::new(Database::new(DbConfig::new(config.database_path())).await?);
//!
//! let mut cashier = Screen::new(ScreenKind::Cashier, db.clone(), db, &config);
//! cashier.mount().await?;
//! # Ok(())
//! # }
//! ```

pub mod committer;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod maintenance;
pub mod notify;
pub mod retry;
pub mod screen;
pub mod session;
pub mod store;

pub use committer::{ConfirmOptions, PreparedCommit, TransactionCommitter};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use idempotency::IdempotencyGuard;
pub use maintenance::CatalogMaintenance;
pub use notify::Notifier;
pub use retry::{RetryCycle, RetryManager, RetryStatus, RetryableOperation};
pub use screen::{ConfirmResult, Screen};
pub use session::{QuickLoad, ReconcileReport, SessionManager};
pub use store::{CatalogAdmin, CatalogStore, LocalCache, MemoryCache};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, `info` by default.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
