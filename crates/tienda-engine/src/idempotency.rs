//! # Idempotency Guard
//!
//! Hands out one op id per logical operation and keeps it in the local
//! cache until the operation is confirmed, so retries and reloads reuse it.
//!
//! ```text
//!   acquire(sale, "cashier-1", fingerprint)
//!     ├── marker at sale:pending:cashier-1:{user}, same fingerprint ──► reuse its op id
//!     └── no marker, or it guards other content ──► generate, persist, return
//!
//!   ledger commit(op id)  ── history row exists? ──► AlreadyApplied
//!
//!   release(sale, "cashier-1")  ──► marker removed (either outcome)
//! ```
//!
//! The cache is best-effort here: if it cannot be read or written the
//! operation still runs with a fresh id, it just loses reload protection.

use std::sync::Arc;

use chrono::Utc;
use tienda_core::idempotency::pending_key;
use tienda_core::{OperationKind, PendingOperation};
use tracing::{debug, info, warn};

use crate::store::LocalCache;

#[derive(Clone)]
pub struct IdempotencyGuard {
    cache: Arc<dyn LocalCache>,
    user_id: Option<String>,
}

impl IdempotencyGuard {
    pub fn new(cache: Arc<dyn LocalCache>, user_id: Option<String>) -> Self {
        IdempotencyGuard { cache, user_id }
    }

    fn key(&self, kind: OperationKind, entity: &str) -> String {
        pending_key(kind, entity, self.user_id.as_deref())
    }

    /// Marker for `(kind, entity)`, reusing a stored one when it guards the
    /// same content.
    pub async fn acquire(
        &self,
        kind: OperationKind,
        entity: &str,
        fingerprint: &str,
    ) -> PendingOperation {
        match self.peek(kind, entity).await {
            Some(existing) if existing.guards(fingerprint) => {
                debug!(kind = %kind, op_id = %existing.op_id, "Reusing pending operation id");
                return existing;
            }
            Some(stale) => {
                info!(kind = %kind, op_id = %stale.op_id, "Content changed, replacing pending operation");
            }
            None => {}
        }

        let marker = PendingOperation::new(kind, entity, fingerprint, Utc::now());
        let key = self.key(kind, entity);
        match serde_json::to_string(&marker) {
            Ok(json) => {
                if let Err(e) = self.cache.set(&key, &json).await {
                    warn!(key = %key, error = %e, "Failed to persist pending marker");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to encode pending marker"),
        }
        debug!(kind = %kind, op_id = %marker.op_id, "New pending operation");
        marker
    }

    /// Stored marker, if any. Unreadable markers count as absent.
    pub async fn peek(&self, kind: OperationKind, entity: &str) -> Option<PendingOperation> {
        let key = self.key(kind, entity);
        match self.cache.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str::<PendingOperation>(&json) {
                Ok(marker) => Some(marker),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding unreadable pending marker");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read pending marker");
                None
            }
        }
    }

    /// Drops the marker once the operation is confirmed.
    pub async fn release(&self, kind: OperationKind, entity: &str) {
        let key = self.key(kind, entity);
        if let Err(e) = self.cache.remove(&key).await {
            warn!(key = %key, error = %e, "Failed to remove pending marker");
        }
    }
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCache;

    fn guard(cache: Arc<MemoryCache>) -> IdempotencyGuard {
        IdempotencyGuard::new(cache, Some("u1".into()))
    }

    #[tokio::test]
    async fn test_acquire_reuses_marker() {
        let cache = Arc::new(MemoryCache::new());
        let guard = guard(cache.clone());

        let first = guard.acquire(OperationKind::Sale, "cashier-1", "cart-a").await;
        let second = guard.acquire(OperationKind::Sale, "cashier-1", "cart-a").await;
        assert_eq!(first.op_id, second.op_id);
        assert!(first.op_id.starts_with("sale_cashier-1_"));

        let stored = cache.get("sale:pending:cashier-1:u1").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_release_forgets_marker() {
        let cache = Arc::new(MemoryCache::new());
        let guard = guard(cache.clone());

        let first = guard.acquire(OperationKind::Purchase, "buys-2", "cart-a").await;
        guard.release(OperationKind::Purchase, "buys-2").await;
        assert!(cache.is_empty().await);

        let next = guard.acquire(OperationKind::Purchase, "buys-2", "cart-a").await;
        assert_ne!(first.op_id, next.op_id);
    }

    #[tokio::test]
    async fn test_corrupt_marker_is_replaced() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("transfer:pending:x:u1", "not json").await.unwrap();
        let guard = guard(cache.clone());

        let marker = guard.acquire(OperationKind::Transfer, "x", "cart-a").await;
        assert!(marker.op_id.starts_with("transfer_x_"));
        assert_eq!(guard.peek(OperationKind::Transfer, "x").await, Some(marker));
    }

    #[tokio::test]
    async fn test_changed_content_gets_new_id() {
        let cache = Arc::new(MemoryCache::new());
        let guard = guard(cache.clone());

        let first = guard.acquire(OperationKind::Sale, "cashier-1", "two-units").await;
        let edited = guard.acquire(OperationKind::Sale, "cashier-1", "five-units").await;
        assert_ne!(first.op_id, edited.op_id);

        // The replacement is what later retries reuse.
        let again = guard.acquire(OperationKind::Sale, "cashier-1", "five-units").await;
        assert_eq!(again.op_id, edited.op_id);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_markers_are_scoped_per_entity() {
        let cache = Arc::new(MemoryCache::new());
        let guard = guard(cache.clone());
        let a = guard.acquire(OperationKind::Sale, "cashier-1", "cart-a").await;
        let b = guard.acquire(OperationKind::Sale, "cashier-2", "cart-a").await;
        assert_ne!(a.op_id, b.op_id);
        assert_eq!(cache.len().await, 2);
    }
}
