//! Configuration file management.
//!
//! The daemon reads `$WAYPOST_DATA_DIR/config.toml` (or the platform default
//! data directory). Every field has a default, so a missing file or a
//! partial one is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use waypost_gate::{PricingPolicy, SponsorPolicy};
use waypost_lightning::LightningConfig;

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// IPC settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Free tier, prices and windows for pin actions.
    #[serde(default)]
    pub pricing: PricingPolicy,
    /// Sponsorship auction settings.
    #[serde(default)]
    pub sponsorship: SponsorPolicy,
    /// Payment provider selection and credentials.
    #[serde(default)]
    pub lightning: LightningConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// IPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unix socket path. Empty = $data_dir/waypost.sock.
    #[serde(default)]
    pub socket_path: String,
    /// Per-subscriber event buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Enable development-only RPC methods such as `dev_mark_invoice_paid`.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_event_buffer() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dev_mode: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, defaulting when absent.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<DaemonConfig>(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledgers cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pricing.validate().map_err(anyhow::Error::msg)?;
        self.sponsorship.validate().map_err(anyhow::Error::msg)?;
        if self.server.event_buffer == 0 {
            anyhow::bail!("server.event_buffer must be greater than 0");
        }
        Ok(())
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the IPC socket path.
    pub fn socket_path(&self) -> PathBuf {
        if self.server.socket_path.is_empty() {
            self.data_dir().join("waypost.sock")
        } else {
            PathBuf::from(&self.server.socket_path)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("WAYPOST_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Waypost")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".waypost")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/waypost"))
}
