//! # Engine Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Local          │  │   Store         │  │     Cycle               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Core           │  │  Db             │  │  RetryBusy              │ │
//! │  │  DriftDetected  │  │  Unavailable    │  │  Abandoned              │ │
//! │  │  Config         │  │  Serialization  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  is_transient() decides what the retry manager keeps retrying.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use tienda_core::{CoreError, StockDrift};
use tienda_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Rejected before anything reached a store.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Cached and remote stock disagree; the caller must accept the drift.
    #[error("Stock drift detected for {} product(s)", .0.len())]
    DriftDetected(Vec<StockDrift>),

    #[error("Invalid engine configuration: {0}")]
    Config(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error(transparent)]
    Db(#[from] DbError),

    /// A collaborator could not be reached (network, offline, quota).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Retry Cycle
    // =========================================================================
    /// A retry cycle is already running on this screen.
    #[error("A retry cycle is already in progress")]
    RetryBusy,

    /// The cycle was abandoned before the operation succeeded.
    #[error("Operation {0} was abandoned")]
    Abandoned(String),
}

impl EngineError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Validation, stock and not-found failures are final; connectivity and
    /// storage hiccups are not.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Unavailable(_) => true,
            EngineError::Db(db) => matches!(
                db,
                DbError::ConnectionFailed(_)
                    | DbError::QueryFailed(_)
                    | DbError::PoolExhausted
                    | DbError::Internal(_)
            ),
            _ => false,
        }
    }

    /// Message shown to the user in a toast.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Core(err) => err.to_string(),
            EngineError::Db(DbError::InsufficientStock {
                product,
                available,
                requested,
                ..
            }) => CoreError::InsufficientStock {
                name: product.clone(),
                available: *available,
                requested: *requested,
            }
            .to_string(),
            EngineError::DriftDetected(drifts) => {
                let lines: Vec<String> = drifts.iter().map(ToString::to_string).collect();
                format!(
                    "El stock cambió desde la última carga:\n{}",
                    lines.join("\n")
                )
            }
            EngineError::RetryBusy => "Ya hay una operación en curso".to_string(),
            EngineError::Abandoned(_) => "Operación cancelada".to_string(),
            other => format!("Error: {}", other),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<tienda_core::ValidationError> for EngineError {
    fn from(err: tienda_core::ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Unavailable("offline".into()).is_transient());
        assert!(EngineError::Db(DbError::PoolExhausted).is_transient());
        assert!(!EngineError::Core(CoreError::EmptyCart).is_transient());
        assert!(!EngineError::Db(DbError::not_found("Product", "P1")).is_transient());
    }

    #[test]
    fn test_commit_time_stock_message() {
        let err = EngineError::Db(DbError::InsufficientStock {
            inventory: "A".into(),
            product: "P1".into(),
            available: 1,
            requested: 2,
        });
        assert_eq!(
            err.user_message(),
            "Stock insuficiente para \"P1\". Solo quedan 1."
        );
    }

    #[test]
    fn test_drift_message_lists_products() {
        let err = EngineError::DriftDetected(vec![StockDrift {
            product_id: "P1".into(),
            product_name: "Harina".into(),
            cached: 5,
            remote: 3,
        }]);
        assert!(err.user_message().contains("Harina: local 5, servidor 3"));
    }
}
