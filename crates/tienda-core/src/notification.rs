//! Toast notification values shown by a screen.
//!
//! The single-slot notifier that owns the dismiss timer lives in
//! `tienda-engine`; this module only defines what a toast is.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// How a toast is styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Info,
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Toast {
    pub message: String,
    pub severity: Severity,
    /// Persistent toasts stay until replaced (retry countdown).
    #[serde(default)]
    pub persistent: bool,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Toast::new(message, Severity::Success)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Toast::new(message, Severity::Error)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Toast::new(message, Severity::Info)
    }

    fn new(message: impl Into<String>, severity: Severity) -> Self {
        Toast {
            message: message.into(),
            severity,
            persistent: false,
        }
    }

    /// Same toast, never auto-dismissed.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toast_json() {
        let toast = Toast::error("Sin conexión").persistent();
        let json = serde_json::to_string(&toast).unwrap();
        assert_eq!(
            json,
            r#"{"message":"Sin conexión","severity":"error","persistent":true}"#
        );
    }
}
