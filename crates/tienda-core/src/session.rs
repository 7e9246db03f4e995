//! # Session Cache Rules
//!
//! Pure half of session persistence: payload shape, cache keys, restore
//! normalization and the write guard. The async state machine that reads and
//! writes the cache lives in `tienda-engine`.
//!
//! ## Cache Keys
//! ```text
//! {screen}:state:{user_id}     e.g. cashier:state:u-42
//! {screen}:state:anon          written alongside, read as fallback
//! ```
//!
//! ## Write Guard
//! ```text
//!                      ┌──────────────────────────┐
//!   tabs changed ────► │ quick load done?         │── no ─┐
//!                      │   or user interacted?    │       │
//!                      └────────────┬─────────────┘       │
//!                                   │ yes                 ▼
//!                      ┌────────────▼─────────────┐     SKIP
//!                      │ memory empty AND no      │       ▲
//!                      │ interaction AND stored   │─ yes ─┘
//!                      │ payload has items?       │
//!                      └────────────┬─────────────┘
//!                                   │ no
//!                                   ▼
//!                                 WRITE (both keys)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tabs::TabSet;
use crate::types::{ScreenKind, Tab};
use crate::ANON_USER;

// =============================================================================
// Keys
// =============================================================================

/// Session key for a user (or the anonymous slot).
pub fn session_key(screen: ScreenKind, user_id: Option<&str>) -> String {
    format!("{}:state:{}", screen.as_str(), user_id.unwrap_or(ANON_USER))
}

/// Keys to read, in order: user first, then anonymous. Deduplicated when
/// there is no user.
pub fn session_keys(screen: ScreenKind, user_id: Option<&str>) -> Vec<String> {
    let user_key = session_key(screen, user_id);
    let anon_key = session_key(screen, None);
    if user_key == anon_key {
        vec![user_key]
    } else {
        vec![user_key, anon_key]
    }
}

// =============================================================================
// Payload
// =============================================================================

/// What a screen writes to the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCachePayload {
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_inventory_id: Option<String>,
    #[serde(default = "default_tab_id")]
    pub active_tab_id: String,
    #[serde(default)]
    pub saved_at: DateTime<Utc>,
}

fn default_tab_id() -> String {
    "1".to_string()
}

impl SessionCachePayload {
    /// Snapshot of a tab set, sanitized for the cache.
    pub fn capture(set: &TabSet, active_inventory_id: Option<&str>, now: DateTime<Utc>) -> Self {
        SessionCachePayload {
            tabs: set.cached_tabs(),
            active_inventory_id: active_inventory_id.map(str::to_string),
            active_tab_id: set.active_tab_id().to_string(),
            saved_at: now,
        }
    }

    /// Units across all tabs.
    pub fn item_count(&self) -> i64 {
        self.tabs.iter().map(Tab::item_count).sum()
    }

    /// Parses a cached JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rebuilds the screen's tab set: exact tab count, merged duplicates,
    /// private customer fields dropped.
    pub fn restore(&self, screen: ScreenKind) -> TabSet {
        let tabs = if screen.sanitizes_customer() {
            self.tabs.iter().map(sanitize_tab).collect()
        } else {
            self.tabs.clone()
        };
        TabSet::from_tabs(screen, tabs, Some(&self.active_tab_id))
    }
}

fn sanitize_tab(tab: &Tab) -> Tab {
    Tab {
        customer: tab.customer.as_ref().map(|c| c.sanitized()),
        payment_method: None,
        ..tab.clone()
    }
}

/// Picks the active inventory to restore: the cached one if it still
/// exists, else the first known inventory.
pub fn resolve_active_inventory<'a, I>(cached: Option<&str>, known: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let known: Vec<&str> = known.into_iter().collect();
    match cached {
        Some(id) if known.contains(&id) => Some(id.to_string()),
        _ => known.first().map(|id| id.to_string()),
    }
}

// =============================================================================
// Write Guard
// =============================================================================

/// Outcome of the persistence guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistDecision {
    Write,
    /// Quick load has not finished and the user has not touched anything.
    SkipBeforeRestore,
    /// Writing would replace a non-empty stored session with an empty one.
    SkipWouldClobber,
}

impl PersistDecision {
    pub fn should_write(&self) -> bool {
        matches!(self, PersistDecision::Write)
    }
}

/// Decides whether the current in-memory state may be written.
///
/// `stored_item_counts` carries the item count of whatever is currently
/// stored under each session key (`None` for a missing or unreadable entry).
pub fn persist_decision<I>(
    quick_load_done: bool,
    user_interacted: bool,
    in_memory_items: i64,
    stored_item_counts: I,
) -> PersistDecision
where
    I: IntoIterator<Item = Option<i64>>,
{
    if !quick_load_done && !user_interacted {
        return PersistDecision::SkipBeforeRestore;
    }
    if in_memory_items == 0 && !user_interacted {
        let stored_has_items = stored_item_counts
            .into_iter()
            .any(|count| count.unwrap_or(0) > 0);
        if stored_has_items {
            return PersistDecision::SkipWouldClobber;
        }
    }
    PersistDecision::Write
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::ExchangeRates;
    use crate::types::{CustomerForm, LineItem, Product};

    fn product(id: &str) -> Product {
        Product {
            id: id.into(),
            name: id.into(),
            brand_id: None,
            cost: 1.0,
            price: 2.0,
            image_url: None,
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(session_key(ScreenKind::Cashier, Some("u1")), "cashier:state:u1");
        assert_eq!(session_key(ScreenKind::Buys, None), "buys:state:anon");
        assert_eq!(session_keys(ScreenKind::Buys, None).len(), 1);
        assert_eq!(
            session_keys(ScreenKind::Cashier, Some("u1")),
            vec!["cashier:state:u1".to_string(), "cashier:state:anon".to_string()]
        );
    }

    #[test]
    fn test_roundtrip_preserves_quantities() {
        let rates = ExchangeRates::new(36.0, 40.0);
        let mut set = TabSet::new(ScreenKind::Cashier);
        set.add_line(&product("P"), 2, rates);
        set.add_line(&product("Q"), 1, rates);
        set.select_tab("4").unwrap();
        set.add_line(&product("P"), 3, rates);

        let payload = SessionCachePayload::capture(&set, Some("A"), Utc::now());
        let json = payload.to_json().unwrap();
        let restored = SessionCachePayload::from_json(&json)
            .unwrap()
            .restore(ScreenKind::Cashier);

        assert_eq!(restored.active_tab_id(), "4");
        for pid in ["P", "Q"] {
            let before: i64 = set.tabs().iter().map(|t| t.quantity_of(pid)).sum();
            let after: i64 = restored.tabs().iter().map(|t| t.quantity_of(pid)).sum();
            assert_eq!(before, after);
        }
        assert!(!restored.user_interacted());
    }

    #[test]
    fn test_restore_sanitizes_legacy_payload() {
        let mut tab = Tab::new("1");
        tab.customer = Some(CustomerForm {
            name: "Luis".into(),
            notes: Some("nota".into()),
            ..CustomerForm::default()
        });
        tab.payment_method = Some("efectivo".into());
        tab.cart
            .push(LineItem::new("P", "P", 1, 1.0, ExchangeRates::default()));
        let payload = SessionCachePayload {
            tabs: vec![tab],
            active_inventory_id: None,
            active_tab_id: "1".into(),
            saved_at: Utc::now(),
        };

        let set = payload.restore(ScreenKind::Cashier);
        assert_eq!(set.tabs().len(), 9);
        assert_eq!(set.active().customer.as_ref().unwrap().notes, None);
        assert_eq!(set.active().payment_method, None);

        let buys = payload.restore(ScreenKind::Buys);
        assert_eq!(buys.active().payment_method.as_deref(), Some("efectivo"));
    }

    #[test]
    fn test_parse_minimal_payload() {
        let payload = SessionCachePayload::from_json(
            r#"{"tabs":[{"id":"2","cart":[{"id":"P","name":"P","quantity":3,"price":1.0}]}]}"#,
        )
        .unwrap();
        assert_eq!(payload.active_tab_id, "1");
        assert_eq!(payload.item_count(), 3);
    }

    #[test]
    fn test_resolve_active_inventory() {
        let known = ["A", "B"];
        assert_eq!(resolve_active_inventory(Some("B"), known), Some("B".into()));
        assert_eq!(resolve_active_inventory(Some("Z"), known), Some("A".into()));
        assert_eq!(resolve_active_inventory(None, known), Some("A".into()));
        assert_eq!(resolve_active_inventory(Some("A"), []), None);
    }

    #[test]
    fn test_guard_blocks_empty_over_stored() {
        let decision = persist_decision(true, false, 0, [Some(3), None]);
        assert_eq!(decision, PersistDecision::SkipWouldClobber);
        assert!(!decision.should_write());
    }

    #[test]
    fn test_guard_before_quick_load() {
        assert_eq!(
            persist_decision(false, false, 2, [None]),
            PersistDecision::SkipBeforeRestore
        );
        assert!(persist_decision(false, true, 0, [Some(5)]).should_write());
    }

    #[test]
    fn test_guard_allows_normal_writes() {
        assert!(persist_decision(true, false, 0, [None, Some(0)]).should_write());
        assert!(persist_decision(true, false, 2, [Some(9)]).should_write());
        assert!(persist_decision(true, true, 0, [Some(9)]).should_write());
    }
}
