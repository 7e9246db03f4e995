//! # Error Types
//!
//! Domain-specific error types for tienda-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tienda-core errors (this file)                                        │
//! │  ├── CoreError        - Business rule violations (local, no network)   │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tienda-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tienda-engine errors                                                  │
//! │  └── EngineError      - What a screen surfaces as a toast              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → Toast               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Message Language
//! `Display` output of these errors is shown verbatim to the cashier, so the
//! messages are written in Spanish. Log fields stay in English.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// Every variant is raised before any remote call is attempted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Requested quantity exceeds the known stock of the selected inventory.
    ///
    /// ## User Workflow
    /// ```text
    /// Confirm sale (qty: 2)
    ///      │
    ///      ▼
    /// Check stock: available=1
    ///      │
    ///      ▼
    /// InsufficientStock { name: "P1", available: 1, requested: 2 }
    ///      │
    ///      ▼
    /// Toast: Stock insuficiente para "P1". Solo quedan 1.
    /// ```
    #[error("Stock insuficiente para \"{name}\". Solo quedan {available}.")]
    InsufficientStock {
        name: String,
        available: i64,
        requested: i64,
    },

    /// No tab with this id exists on the screen.
    #[error("La pestaña {0} no existe")]
    TabNotFound(String),

    /// No line for this product in the active tab.
    #[error("El producto {0} no está en el carrito")]
    LineNotFound(String),

    /// The product is not present in the catalog snapshot.
    #[error("Producto no encontrado: {0}")]
    ProductNotFound(String),

    /// The inventory is not present in the catalog snapshot.
    #[error("Inventario no encontrado: {0}")]
    InventoryNotFound(String),

    /// Commit attempted with an empty cart.
    #[error("El carrito está vacío")]
    EmptyCart,

    /// Commit attempted without selecting an inventory.
    #[error("Seleccione un inventario")]
    NoInventorySelected,

    /// Sale attempted without a payment method.
    #[error("Seleccione un método de pago")]
    NoPaymentMethod,

    /// Transfer source and destination are the same inventory.
    #[error("El inventario de origen y destino deben ser distintos")]
    SameInventoryTransfer,

    /// Sale without a national id needs explicit confirmation.
    #[error("El cliente no tiene cédula; confirme para continuar sin guardar sus datos")]
    CustomerConfirmationRequired,

    /// Nothing can be added: every unit is already reserved.
    #[error("No queda stock disponible de \"{name}\"")]
    NothingAvailable { name: String },

    /// Validation error (wraps ValidationError).
    #[error("{0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when user input doesn't meet requirements.
/// The offending input is left unchanged by the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} es obligatorio")]
    Required { field: String },

    /// Value could not be parsed as a number.
    #[error("{field} no es un número válido: '{value}'")]
    NotANumber { field: String, value: String },

    /// Value is NaN or infinite.
    #[error("{field} debe ser un número finito")]
    NotFinite { field: String },

    /// Value must not be negative.
    #[error("{field} no puede ser negativo")]
    Negative { field: String },

    /// Value exceeds maximum length.
    #[error("{field} excede el máximo de {max} caracteres")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., unknown screen name).
    #[error("{field} tiene un formato inválido: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
