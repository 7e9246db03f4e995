//! # Repository Module
//!
//! Database repositories for Tienda POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Committer / Screen                                                     │
//! │       │                                                                 │
//! │       │  db.ledger().commit(&plan)                                      │
//! │       ▼                                                                 │
//! │  LedgerRepository                                                       │
//! │  ├── commit(&self, plan)    ← one transaction, idempotent by op id      │
//! │  ├── refund(&self, op_id)                                               │
//! │  └── list(&self, filter)                                                │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Snapshot reads, inventories, brands, rates
//! - [`product::ProductRepository`] - Idempotent product create/edit/delete
//! - [`ledger::LedgerRepository`] - Sales, purchases, transfers, refunds, history
//! - [`customer::CustomerRepository`] - Customer directory
//! - [`cache::LocalCacheRepository`] - Durable key/value cache
//! - [`outbox::OutboxRepository`] - Image cleanup jobs

pub mod cache;
pub mod catalog;
pub mod customer;
pub mod ledger;
pub mod outbox;
pub mod product;
