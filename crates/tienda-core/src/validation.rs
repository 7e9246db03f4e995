//! # Validation Module
//!
//! Input parsing and validation for everything a cashier can type.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Frontend                                                      │
//! │  └── Raw text from quantity / price inputs                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                   │
//! │  ├── Decimal parsing ("12,5" and "12.5" are the same)                   │
//! │  └── Finite, non-negative checks                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── CHECK (quantity >= 0)                                              │
//! │  └── Primary keys on history op ids                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A rejected input never changes state: callers validate first and mutate
//! only on `Ok`.

use crate::currency::ExchangeRates;
use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest product / inventory / brand name accepted.
pub const MAX_NAME_LEN: usize = 200;

// =============================================================================
// Numeric Input
// =============================================================================

/// Parses a user-typed decimal. Accepts `,` as the decimal separator.
///
/// ## Example
/// ```rust
/// use tienda_core::validation::parse_decimal;
///
/// assert_eq!(parse_decimal("precio", "12,5").unwrap(), 12.5);
/// assert_eq!(parse_decimal("precio", " 3.25 ").unwrap(), 3.25);
/// assert!(parse_decimal("precio", "-1").is_err());
/// assert!(parse_decimal("precio", "abc").is_err());
/// ```
pub fn parse_decimal(field: &str, raw: &str) -> ValidationResult<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let normalized = trimmed.replace(',', ".");
    let value: f64 = normalized
        .parse()
        .map_err(|_| ValidationError::NotANumber {
            field: field.to_string(),
            value: trimmed.to_string(),
        })?;

    validate_amount(field, value)
}

/// A money amount must be finite and not negative.
pub fn validate_amount(field: &str, value: f64) -> ValidationResult<f64> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
        });
    }
    if value < 0.0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }
    Ok(value)
}

/// Converts a quantity input into whole units.
///
/// Fractions are truncated; NaN, infinity and negatives are rejected.
pub fn validate_quantity(value: f64) -> ValidationResult<i64> {
    let value = validate_amount("cantidad", value)?;
    Ok(value.trunc() as i64)
}

/// Both rates must be finite and strictly positive to be saved.
pub fn validate_rates(rates: ExchangeRates) -> ValidationResult<ExchangeRates> {
    for (field, value) in [("tasa BCV", rates.bcv), ("tasa paralelo", rates.paralelo)] {
        validate_amount(field, value)?;
        if value == 0.0 {
            return Err(ValidationError::Required {
                field: field.to_string(),
            });
        }
    }
    Ok(rates)
}

// =============================================================================
// Text Input
// =============================================================================

/// Validates a display name (product, inventory, brand).
pub fn validate_name(field: &str, name: &str) -> ValidationResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(name.to_string())
}

/// Canonical form of a national id used as the customer directory key.
///
/// Strips everything except letters and digits and uppercases, so
/// `"v-12.345.678"` and `"V12345678"` land on the same record.
pub fn normalize_national_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
