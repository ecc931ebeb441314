//! # Sync Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     MAKHZAN_CLOUD_URL=wss://cloud.example/sync                          │
//! │     MAKHZAN_DEVICE_ID=abc-123                                           │
//! │     MAKHZAN_SYNC_ENABLED=false                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/makhzan/sync.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.makhzan.app/sync.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     auto-generated device id, sync enabled, stock timings               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Warehouse Desk"
//!
//! [cloud]
//! url = "wss://cloud.example/sync"
//! enabled = true
//!
//! [timing]
//! push_timeout_secs = 10
//! drain_interval_secs = 60
//! heartbeat_interval_secs = 60
//! ```
//!
//! The device id is generated on first run and written back to the config
//! file so it survives restarts: counters, presence and `lastModifiedBy`
//! stamps all key off it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Settings
// =============================================================================

/// Identity of this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Unique device identifier (UUID v4), generated on first run.
    pub id: String,

    /// Human-readable device name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Warehouse Device".to_string()
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Cloud Settings
// =============================================================================

/// Cloud endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// WebSocket URL of the cloud endpoint.
    #[serde(default)]
    pub url: Option<String>,

    /// Master switch; false keeps the app fully offline.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            url: None,
            enabled: default_true(),
        }
    }
}

// =============================================================================
// Timing Settings
// =============================================================================

/// Timeouts and intervals for the sync workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Per-push timeout before the mutation is parked in the retry queue.
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,

    /// Interval between retry queue drains.
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Entries pulled per drain pass.
    #[serde(default = "default_retry_batch")]
    pub retry_batch_size: u32,

    /// Interval between device heartbeats (and command polls).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// WebSocket connect timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Initial reconnect backoff.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum reconnect backoff.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_push_timeout() -> u64 {
    10
}
fn default_drain_interval() -> u64 {
    60
}
fn default_retry_batch() -> u32 {
    50
}
fn default_heartbeat_interval() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            push_timeout_secs: default_push_timeout(),
            drain_interval_secs: default_drain_interval(),
            retry_batch_size: default_retry_batch(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl TimingSettings {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device identity.
    #[serde(default)]
    pub device: DeviceSettings,

    /// Cloud endpoint.
    #[serde(default)]
    pub cloud: CloudSettings,

    /// Worker timings.
    #[serde(default)]
    pub timing: TimingSettings,
}

impl SyncConfig {
    /// Creates a config with defaults and a fresh device id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file and environment.
    ///
    /// A missing file is not an error; the generated device id is written
    /// back so the identity persists.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let path = config_path.or_else(Self::default_config_path);

        let mut config = match &path {
            Some(p) if p.exists() => {
                info!(path = %p.display(), "Loading sync config");
                let contents = std::fs::read_to_string(p)?;
                toml::from_str(&contents)?
            }
            Some(p) => {
                debug!(path = %p.display(), "Config file not found, using defaults");
                let config = Self::default();
                if let Err(e) = config.save(Some(p.clone())) {
                    warn!(error = %e, "Could not persist generated device id");
                }
                config
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads config, falling back to defaults on any failure.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load sync config, using defaults");
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        Ok(())
    }

    /// Platform config file location.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "makhzan", "makhzan")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("MAKHZAN_CLOUD_URL") {
            if !url.is_empty() {
                self.cloud.url = Some(url);
            }
        }
        if let Ok(id) = std::env::var("MAKHZAN_DEVICE_ID") {
            if !id.is_empty() {
                self.device.id = id;
            }
        }
        if let Ok(enabled) = std::env::var("MAKHZAN_SYNC_ENABLED") {
            self.cloud.enabled = !matches!(enabled.as_str(), "false" | "0" | "no");
        }
    }

    /// Validates the loaded configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("Device id is empty".into()));
        }
        if let Some(url) = &self.cloud.url {
            let parsed = url::Url::parse(url)?;
            match parsed.scheme() {
                "ws" | "wss" => {}
                other => {
                    return Err(SyncError::InvalidUrl(format!(
                        "Expected ws:// or wss://, got {other}://"
                    )));
                }
            }
        }
        if self.timing.push_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "push_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// True when sync should run at all.
    pub fn is_sync_enabled(&self) -> bool {
        self.cloud.enabled
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
