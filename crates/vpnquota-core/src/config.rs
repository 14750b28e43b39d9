//! Application configuration
//!
//! Layered in this order: built-in defaults, the optional `config.json` in the
//! project data directory, then `VPNQUOTA_*` environment variables. Callers
//! (the CLI) apply their own flag overrides on top and call [`AppConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable overriding the accounting server base URL
pub const ENV_BASE_URL: &str = "VPNQUOTA_BASE_URL";

/// Environment variable overriding the client API key
pub const ENV_API_KEY: &str = "VPNQUOTA_API_KEY";

/// Environment variable overriding the database path
pub const ENV_DB_PATH: &str = "VPNQUOTA_DB_PATH";

/// Default ledger tick interval while a tunnel is active
pub const DEFAULT_LEDGER_INTERVAL_SECS: u64 = 5;

/// Default refresh interval for UI-facing resync
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 10;

/// Hard cap on the sync call made while disconnecting
pub const DEFAULT_DISCONNECT_SYNC_TIMEOUT_SECS: u64 = 3;

/// Default connect timeout of the accounting RPC
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// Default overall request timeout of the accounting RPC
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default warning threshold (percentage)
pub const DEFAULT_WARNING_THRESHOLD: u8 = 80;

/// Default forced-disconnect threshold (percentage)
pub const DEFAULT_DISCONNECT_THRESHOLD: u8 = 95;

const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "vpnquota.db";

// ============================================================================
// AppConfig
// ============================================================================

/// Runtime configuration shared by the CLI and the core services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Accounting server base URL, e.g. `https://api.example.com`
    pub base_url: String,
    /// Client key appended to every accounting request
    pub api_key: String,
    /// SQLite database path; `None` means the project data directory
    pub db_path: Option<PathBuf>,
    /// Ledger tick interval in seconds (tunnel active)
    pub ledger_interval_secs: u64,
    /// Refresh tick interval in seconds (independent of the tunnel)
    pub refresh_interval_secs: u64,
    /// Cap on the disconnect-path sync in seconds
    pub disconnect_sync_timeout_secs: u64,
    /// RPC connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// RPC request timeout in seconds
    pub request_timeout_secs: u64,
    /// Usage percentage that shows the one-per-day warning
    pub warning_threshold: u8,
    /// Usage percentage that forces the first disconnect of the day
    pub disconnect_threshold: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            db_path: None,
            ledger_interval_secs: DEFAULT_LEDGER_INTERVAL_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            disconnect_sync_timeout_secs: DEFAULT_DISCONNECT_SYNC_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            disconnect_threshold: DEFAULT_DISCONNECT_THRESHOLD,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file location plus environment
    pub fn load() -> Result<Self> {
        let file = match project_dirs() {
            Ok(dirs) => Some(dirs.config_dir().join(CONFIG_FILE_NAME)),
            Err(e) => {
                log::debug!("[config] No project directories: {}", e);
                None
            }
        };
        Self::load_from(file.as_deref())
    }

    /// Load configuration from an explicit file (if it exists) plus environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                log::debug!("[config] Reading {}", p.display());
                let content = std::fs::read_to_string(p)?;
                serde_json::from_str::<AppConfig>(&content)?
            }
            _ => AppConfig::default(),
        };
        config.apply_env();
        Ok(config.validate())
    }

    /// Apply `VPNQUOTA_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.api_key = key;
        }
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        let warning = self.warning_threshold.min(100);
        let disconnect = self.disconnect_threshold.clamp(warning, 100);
        Self {
            base_url: self.base_url.trim().trim_end_matches('/').to_string(),
            api_key: self.api_key.trim().to_string(),
            db_path: self.db_path.clone(),
            ledger_interval_secs: self.ledger_interval_secs.max(1),
            refresh_interval_secs: self.refresh_interval_secs.max(1),
            disconnect_sync_timeout_secs: self.disconnect_sync_timeout_secs.clamp(1, 10),
            connect_timeout_secs: self.connect_timeout_secs.max(1),
            request_timeout_secs: self.request_timeout_secs.max(1),
            warning_threshold: warning,
            disconnect_threshold: disconnect,
        }
    }

    /// Fail when the accounting server cannot be reached with this config
    pub fn require_remote(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::config(format!(
                "base_url is not set (use {} or config.json)",
                ENV_BASE_URL
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::config(format!(
                "base_url must start with http:// or https://, got {}",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Resolve the database path
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(p) => Ok(p.clone()),
            None => Ok(project_dirs()?.data_dir().join(DB_FILE_NAME)),
        }
    }

    pub fn ledger_interval(&self) -> Duration {
        Duration::from_secs(self.ledger_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn disconnect_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_sync_timeout_secs)
    }
}

/// Path of the optional JSON config file
pub fn config_file_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "vpnquota", "vpnquota")
        .ok_or_else(|| Error::config("Could not determine project directories"))
}
