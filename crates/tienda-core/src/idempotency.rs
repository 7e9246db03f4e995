//! # Operation Ids
//!
//! Every committable operation gets one id before its first attempt. The id
//! is persisted locally and reused by every retry, and the ledger refuses to
//! apply the same id twice.
//!
//! ## Id Format
//! ```text
//! {kind}_{entity}_{timestamp_ms}_{random}
//!
//! sale_1_1760870400000_3f9a1c2e          (entity = tab id)
//! product_edit_P42_1760870400000_b71d0a55 (entity = product id)
//! ```
//!
//! ## Pending Marker Lifecycle
//! ```text
//!  confirm ──► marker exists? ──no──► generate + persist ──┐
//!                    │ yes                                 │
//!                    └──────────► reuse ◄──────────────────┘
//!                                   │
//!                             attempt(s) ...
//!                                   │
//!                  Applied / AlreadyApplied ──► delete marker
//! ```
//!
//! A marker also carries a fingerprint of the content it guards (the cart,
//! the product draft). Reuse requires the fingerprint to match; an edited
//! cart after an abandoned cycle is a new operation with a new id.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::ANON_USER;

/// Kinds of operations guarded by an op id. Also the `kind` column of the
/// history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum OperationKind {
    ProductCreate,
    ProductEdit,
    ProductDelete,
    Sale,
    Purchase,
    Transfer,
}

impl OperationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ProductCreate => "product_create",
            OperationKind::ProductEdit => "product_edit",
            OperationKind::ProductDelete => "product_delete",
            OperationKind::Sale => "sale",
            OperationKind::Purchase => "purchase",
            OperationKind::Transfer => "transfer",
        }
    }

    /// Prefix of the human-facing business id.
    pub const fn business_prefix(&self) -> &'static str {
        match self {
            OperationKind::Sale => "VTA",
            OperationKind::Purchase => "CMP",
            OperationKind::Transfer => "TRF",
            OperationKind::ProductCreate
            | OperationKind::ProductEdit
            | OperationKind::ProductDelete => "PRD",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product_create" => Ok(OperationKind::ProductCreate),
            "product_edit" => Ok(OperationKind::ProductEdit),
            "product_delete" => Ok(OperationKind::ProductDelete),
            "sale" => Ok(OperationKind::Sale),
            "purchase" => Ok(OperationKind::Purchase),
            "transfer" => Ok(OperationKind::Transfer),
            other => Err(ValidationError::InvalidFormat {
                field: "tipo de operación".to_string(),
                reason: format!("'{}' desconocido", other),
            }),
        }
    }
}

/// Generates a fresh op id.
pub fn generate_op_id(kind: OperationKind, entity: &str, now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}",
        kind.as_str(),
        sanitize_entity(entity),
        now.timestamp_millis(),
        &random[..8]
    )
}

/// Entity part of an id: underscores would make the id ambiguous.
fn sanitize_entity(entity: &str) -> String {
    let cleaned: String = entity
        .trim()
        .chars()
        .map(|c| if c == '_' || c.is_whitespace() { '-' } else { c })
        .collect();
    if cleaned.is_empty() {
        "new".to_string()
    } else {
        cleaned
    }
}

/// Short id shown on receipts and history, derived from the op id.
///
/// ## Example
/// ```rust
/// use tienda_core::idempotency::{business_id, OperationKind};
///
/// let id = business_id(OperationKind::Sale, "sale_1_1760870400000_3f9a1c2e");
/// assert_eq!(id, "VTA-3F9A1C2E");
/// ```
pub fn business_id(kind: OperationKind, op_id: &str) -> String {
    let random = op_id.rsplit('_').next().unwrap_or(op_id);
    format!("{}-{}", kind.business_prefix(), random.to_uppercase())
}

/// Local cache key of a pending marker.
pub fn pending_key(kind: OperationKind, entity: &str, user_id: Option<&str>) -> String {
    format!(
        "{}:pending:{}:{}",
        kind.as_str(),
        sanitize_entity(entity),
        user_id.unwrap_or(ANON_USER)
    )
}

/// Stable digest of the content an operation commits.
///
/// Name-based UUID over the JSON encoding, so it survives restarts. A value
/// that cannot be encoded digests as empty input.
pub fn fingerprint<T: Serialize + ?Sized>(content: &T) -> String {
    let bytes = serde_json::to_vec(content).unwrap_or_default();
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).simple().to_string()
}

/// Locally persisted marker for an operation that has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub op_id: String,
    /// Digest of the guarded content; markers from older builds have none.
    #[serde(default)]
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl PendingOperation {
    /// New marker with a fresh id.
    pub fn new(
        kind: OperationKind,
        entity: &str,
        fingerprint: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        PendingOperation {
            op_id: generate_op_id(kind, entity, now),
            fingerprint: fingerprint.into(),
            created_at: now,
        }
    }

    /// Whether this marker guards exactly `fingerprint`.
    pub fn guards(&self, fingerprint: &str) -> bool {
        !self.fingerprint.is_empty() && self.fingerprint == fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_op_id_format() {
        let now = Utc.timestamp_millis_opt(1_760_870_400_000).unwrap();
        let id = generate_op_id(OperationKind::ProductEdit, "P_42", now);
        let parts: Vec<&str> = id.rsplitn(3, '_').collect();
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1], "1760870400000");
        assert_eq!(parts[2], "product_edit_P-42");
    }

    #[test]
    fn test_op_ids_are_unique() {
        let now = Utc::now();
        let a = generate_op_id(OperationKind::Sale, "1", now);
        let b = generate_op_id(OperationKind::Sale, "1", now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pending_key() {
        assert_eq!(
            pending_key(OperationKind::Sale, "3", Some("u1")),
            "sale:pending:3:u1"
        );
        assert_eq!(
            pending_key(OperationKind::Transfer, "", None),
            "transfer:pending:new:anon"
        );
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            OperationKind::ProductCreate,
            OperationKind::ProductEdit,
            OperationKind::ProductDelete,
            OperationKind::Sale,
            OperationKind::Purchase,
            OperationKind::Transfer,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_marker_json() {
        let marker = PendingOperation::new(OperationKind::Purchase, "1", "f00d", Utc::now());
        let json = serde_json::to_string(&marker).unwrap();
        assert!(json.contains("\"opId\""));
        let back: PendingOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, marker);
    }

    #[test]
    fn test_fingerprint_follows_content() {
        let a = fingerprint(&("P", 2, 1.5));
        assert_eq!(a, fingerprint(&("P", 2, 1.5)));
        assert_ne!(a, fingerprint(&("P", 5, 1.5)));
        assert_eq!(a.len(), 32);

        let marker = PendingOperation::new(OperationKind::Sale, "cashier-1", a.clone(), Utc::now());
        assert!(marker.guards(&a));
        assert!(!marker.guards(&fingerprint(&("P", 5, 1.5))));
    }

    #[test]
    fn test_marker_without_fingerprint_guards_nothing() {
        let legacy: PendingOperation = serde_json::from_str(
            r#"{"opId":"sale_1_1760870400000_3f9a1c2e","createdAt":"2025-10-19T12:00:00Z"}"#,
        )
        .unwrap();
        assert!(legacy.fingerprint.is_empty());
        assert!(!legacy.guards(""));
    }
}
