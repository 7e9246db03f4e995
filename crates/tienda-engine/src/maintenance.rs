//! # Catalog Maintenance
//!
//! Product create/edit/delete with the same idempotency rules as sales:
//! one op id per pending edit, reused on retry while the draft is the same,
//! released once the ledger confirms. Each change leaves a `product_*` entry
//! in history.
//!
//! ```text
//!   create_product(draft)
//!     ├── marker  product_create:pending:new  (fingerprint of the draft)
//!     ├── RetryManager cycle ── transient error ──► countdown, retry_now, abandon
//!     └── Ok ──► marker released, "Producto creado"
//! ```
//!
//! An abandoned write keeps its marker, so submitting the same draft again
//! reuses the op id and cannot create a second product.

use std::future::Future;
use std::sync::Arc;

use tienda_core::idempotency::fingerprint;
use tienda_core::{CommitOutcome, ExchangeRates, NamedRef, OperationKind, Product};
use tienda_db::ProductDraft;
use tokio::sync::watch;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::idempotency::IdempotencyGuard;
use crate::notify::Notifier;
use crate::retry::{RetryManager, RetryStatus, RetryableOperation};
use crate::store::{CatalogAdmin, LocalCache};

/// Entity used for the pending marker of a product not created yet.
const NEW_PRODUCT: &str = "new";

pub struct CatalogMaintenance {
    admin: Arc<dyn CatalogAdmin>,
    guard: IdempotencyGuard,
    retry: RetryManager,
    notifier: Notifier,
    user_id: Option<String>,
}

impl CatalogMaintenance {
    pub fn new(
        admin: Arc<dyn CatalogAdmin>,
        cache: Arc<dyn LocalCache>,
        config: &EngineConfig,
    ) -> Self {
        let user_id = config.user_id().map(str::to_string);
        let notifier = Notifier::new(config.toast_duration());
        CatalogMaintenance {
            guard: IdempotencyGuard::new(cache, user_id.clone()),
            retry: RetryManager::new(notifier.clone(), config.retry_countdown()),
            notifier,
            admin,
            user_id,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn retry_status(&self) -> RetryStatus {
        self.retry.status()
    }

    pub fn subscribe_retry(&self) -> watch::Receiver<RetryStatus> {
        self.retry.subscribe()
    }

    /// Skips the retry countdown.
    pub fn retry_now(&self) -> bool {
        self.retry.retry_now()
    }

    /// Gives up on the running product write. Its marker stays behind.
    pub fn abandon(&self) -> bool {
        self.retry.abandon()
    }

    /// Runs `write` under the marker for `(kind, entity)` until it succeeds,
    /// fails permanently or is abandoned. Returns the op id with the result.
    async fn run<T, F, Fut>(
        &self,
        kind: OperationKind,
        entity: &str,
        content: &str,
        success_message: &str,
        write: F,
    ) -> EngineResult<(String, T)>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn CatalogAdmin>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<T>> + Send + 'static,
    {
        if self.retry.is_busy() {
            self.notifier.error(EngineError::RetryBusy.user_message());
            return Err(EngineError::RetryBusy);
        }

        let marker = self.guard.acquire(kind, entity, content).await;
        let admin = Arc::clone(&self.admin);
        let guard = self.guard.clone();
        let entity = Arc::new(entity.to_string());
        let op_id = marker.op_id.clone();

        let op = RetryableOperation::new(marker.op_id.clone(), success_message, move || {
            let attempt = write(Arc::clone(&admin), op_id.clone());
            let guard = guard.clone();
            let entity = Arc::clone(&entity);
            async move {
                let result = attempt.await;
                match &result {
                    Ok(_) => guard.release(kind, &entity).await,
                    Err(e) if !e.is_transient() => guard.release(kind, &entity).await,
                    Err(_) => {}
                }
                result
            }
        });

        let value = self.retry.start(op)?.join().await?;
        Ok((marker.op_id, value))
    }

    pub async fn create_product(&self, draft: ProductDraft) -> EngineResult<Product> {
        let content = fingerprint(&draft);
        let user_id = self.user_id.clone();
        let (op_id, (outcome, product)) = self
            .run(
                OperationKind::ProductCreate,
                NEW_PRODUCT,
                &content,
                "Producto creado",
                move |admin, op_id| {
                    let draft = draft.clone();
                    let user_id = user_id.clone();
                    async move {
                        admin
                            .create_product(&op_id, draft, user_id.as_deref())
                            .await
                    }
                },
            )
            .await?;
        info!(op_id = %op_id, product_id = %product.id, ?outcome, "Product created");
        Ok(product)
    }

    pub async fn edit_product(&self, id: &str, draft: ProductDraft) -> EngineResult<CommitOutcome> {
        let content = fingerprint(&draft);
        let user_id = self.user_id.clone();
        let product_id = id.to_string();
        let (op_id, outcome) = self
            .run(
                OperationKind::ProductEdit,
                id,
                &content,
                "Producto actualizado",
                move |admin, op_id| {
                    let draft = draft.clone();
                    let user_id = user_id.clone();
                    let product_id = product_id.clone();
                    async move {
                        admin
                            .edit_product(&op_id, &product_id, draft, user_id.as_deref())
                            .await
                    }
                },
            )
            .await?;
        info!(op_id = %op_id, product_id = id, ?outcome, "Product edited");
        Ok(outcome)
    }

    pub async fn delete_product(&self, id: &str) -> EngineResult<CommitOutcome> {
        let content = fingerprint(id);
        let user_id = self.user_id.clone();
        let product_id = id.to_string();
        let (op_id, outcome) = self
            .run(
                OperationKind::ProductDelete,
                id,
                &content,
                "Producto eliminado",
                move |admin, op_id| {
                    let user_id = user_id.clone();
                    let product_id = product_id.clone();
                    async move {
                        admin
                            .delete_product(&op_id, &product_id, user_id.as_deref())
                            .await
                    }
                },
            )
            .await?;
        info!(op_id = %op_id, product_id = id, ?outcome, "Product deleted");
        Ok(outcome)
    }

    pub async fn create_inventory(&self, name: &str) -> EngineResult<NamedRef> {
        self.admin.create_inventory(name).await
    }

    pub async fn create_brand(&self, name: &str) -> EngineResult<NamedRef> {
        self.admin.create_brand(name).await
    }

    pub async fn set_exchange_rates(&self, rates: ExchangeRates) -> EngineResult<()> {
        self.admin.set_exchange_rates(rates).await
    }
}

impl std::fmt::Debug for CatalogMaintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogMaintenance")
            .field("user_id", &self.user_id)
            .field("retry", &self.retry)
            .finish()
    }
}
