//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     TIENDA_DB_PATH=/data/tienda.db                                      │
//! │     TIENDA_USER_ID=cajero-1                                             │
//! │     TIENDA_RETRY_SECS=30                                                │
//! │     TIENDA_TOAST_SECS=4                                                 │
//! │     TIENDA_PREFLIGHT_REMOTE=false                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/pos/engine.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.tienda.pos/engine.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [store]
//! database_path = "/var/lib/tienda/tienda.db"
//! user_id = "cajero-1"
//!
//! [retry]
//! countdown_secs = 30
//!
//! [notify]
//! toast_secs = 4
//!
//! [commit]
//! preflight_remote_check = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Sections
// =============================================================================

/// Where data lives and who is signed in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Signed-in user; `None` scopes cache keys to `anon`.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Seconds between a failed attempt and the automatic retry.
    #[serde(default = "default_countdown")]
    pub countdown_secs: u64,
}

fn default_countdown() -> u64 {
    30
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            countdown_secs: default_countdown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    /// How long a regular toast stays visible.
    #[serde(default = "default_toast_secs")]
    pub toast_secs: u64,
}

fn default_toast_secs() -> u64 {
    4
}

impl Default for NotifySettings {
    fn default() -> Self {
        NotifySettings {
            toast_secs: default_toast_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSettings {
    /// Re-read remote stock before purchases to surface drift.
    #[serde(default = "default_true")]
    pub preflight_remote_check: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CommitSettings {
    fn default() -> Self {
        CommitSettings {
            preflight_remote_check: true,
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub notify: NotifySettings,

    #[serde(default)]
    pub commit: CommitSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.retry.countdown_secs == 0 {
            return Err(EngineError::Config(
                "retry.countdown_secs must be greater than 0".into(),
            ));
        }
        if self.notify.toast_secs == 0 {
            return Err(EngineError::Config(
                "notify.toast_secs must be greater than 0".into(),
            ));
        }
        if let Some(user) = &self.store.user_id {
            if user.trim().is_empty() {
                return Err(EngineError::Config("store.user_id must not be blank".into()));
            }
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TIENDA_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.store.database_path = Some(PathBuf::from(path));
        }

        if let Ok(user) = std::env::var("TIENDA_USER_ID") {
            self.store.user_id = Some(user);
        }

        if let Ok(secs) = std::env::var("TIENDA_RETRY_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.retry.countdown_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid TIENDA_RETRY_SECS"),
            }
        }

        if let Ok(secs) = std::env::var("TIENDA_TOAST_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.notify.toast_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid TIENDA_TOAST_SECS"),
            }
        }

        if let Ok(flag) = std::env::var("TIENDA_PREFLIGHT_REMOTE") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.commit.preflight_remote_check = true,
                "0" | "false" | "no" => self.commit.preflight_remote_check = false,
                _ => warn!(value = %flag, "Ignoring invalid TIENDA_PREFLIGHT_REMOTE"),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "tienda", "pos")
    }

    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Configured database path, else `tienda.db` in the platform data dir,
    /// else the working directory.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .or_else(|| Self::project_dirs().map(|dirs| dirs.data_dir().join("tienda.db")))
            .unwrap_or_else(|| PathBuf::from("tienda.db"))
    }

    pub fn user_id(&self) -> Option<&str> {
        self.store.user_id.as_deref()
    }

    pub fn retry_countdown(&self) -> Duration {
        Duration::from_secs(self.retry.countdown_secs)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_secs(self.notify.toast_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.countdown_secs, 30);
        assert_eq!(config.notify.toast_secs, 4);
        assert!(config.commit.preflight_remote_check);
        assert!(config.user_id().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [store]
            user_id = "cajero-1"

            [retry]
            countdown_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.user_id(), Some("cajero-1"));
        assert_eq!(config.retry_countdown(), Duration::from_secs(10));
        assert_eq!(config.toast_duration(), Duration::from_secs(4));
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.retry.countdown_secs = 0;
        assert!(config.validate().is_err());

        config.retry.countdown_secs = 5;
        config.store.user_id = Some("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[commit]"));
    }

    #[test]
    fn test_explicit_database_path() {
        let mut config = EngineConfig::default();
        config.store.database_path = Some(PathBuf::from("/tmp/t.db"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/t.db"));
    }
}
