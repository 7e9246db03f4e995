//! # tienda-core: Pure Business Logic for Tienda POS
//!
//! Everything the Cashier, Buys and Transfers screens compute without
//! touching storage: dual-currency pricing, tab carts, cross-tab
//! reservations, stock reconciliation and commit plans.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tienda POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 tienda-engine (per-screen, tokio)               │   │
//! │  │   SessionManager ─ TransactionCommitter ─ RetryManager          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tienda-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌─────────────┐ ┌────────────┐     │   │
//! │  │   │ currency │ │   tabs   │ │ reservation │ │ reconcile  │     │   │
//! │  │   │ Bs / USD │ │  TabSet  │ │ ReservMap   │ │ old → new  │     │   │
//! │  │   └──────────┘ └──────────┘ └─────────────┘ └────────────┘     │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌─────────────┐ ┌────────────┐     │   │
//! │  │   │ session  │ │  commit  │ │ idempotency │ │ validation │     │   │
//! │  │   └──────────┘ └──────────┘ └─────────────┘ └────────────┘     │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO TIMERS • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tienda-db (SQLite)                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`currency`] - USD → Bs conversion and cart totals
//! - [`types`] - Products, inventories, tabs, line items
//! - [`catalog`] - In-memory catalog snapshot fed by change events
//! - [`tabs`] - The per-screen tab set and its cart operations
//! - [`reservation`] - Units held by other tabs
//! - [`reconcile`] - Fitting carts into real stock
//! - [`session`] - Session cache payload, keys and write guard
//! - [`idempotency`] - Operation ids and pending markers
//! - [`commit`] - Stock deltas and history records for a confirmed tab
//! - [`notification`] - Toast values
//! - [`validation`] - Parsing typed input
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tienda_core::{ExchangeRates, Product, ScreenKind, TabSet};
//!
//! let rates = ExchangeRates::new(36.0, 40.0);
//! let harina = Product {
//!     id: "P1".into(),
//!     name: "Harina".into(),
//!     brand_id: None,
//!     cost: 6.0,
//!     price: 10.0,
//!     image_url: None,
//! };
//!
//! let mut tabs = TabSet::new(ScreenKind::Cashier);
//! tabs.add_line(&harina, 1, rates);
//!
//! let totals = tabs.totals(rates);
//! assert_eq!(totals.bs, 400);
//! assert_eq!((totals.usd_int, totals.bs_decimals), (11, 4));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod catalog;
pub mod commit;
pub mod currency;
pub mod error;
pub mod idempotency;
pub mod notification;
pub mod reconcile;
pub mod reservation;
pub mod session;
pub mod tabs;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use catalog::{CatalogEvent, CatalogSnapshot};
pub use commit::{CommitOutcome, CommitPlan, HistoryRecord, StockDelta, StockDrift};
pub use currency::{calculate_amounts, CartTotals, ExchangeRates, MoneyAmounts};
pub use error::{CoreError, CoreResult, ValidationError};
pub use idempotency::{OperationKind, PendingOperation};
pub use notification::{Severity, Toast};
pub use reconcile::StockAdjustment;
pub use session::SessionCachePayload;
pub use tabs::{AddOutcome, TabSet};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Tabs on the Cashier and Buys screens.
pub const TAB_COUNT: usize = 9;

/// User segment of cache keys when nobody is signed in.
pub const ANON_USER: &str = "anon";
