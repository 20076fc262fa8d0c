//! Configuration loading for waypost.
//!
//! Every field has a production default, so a config file only needs to name
//! what it overrides. Unknown fields are rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AcquireOptions, ConfigError, FreshnessThresholds};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaypostConfig {
    pub sampler: SamplerConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub monitor: MonitorConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    /// Foreground, focused.
    pub active_interval_ms: u64,
    /// Foreground, focus lost.
    pub background_interval_ms: u64,
    /// Visibility hidden.
    pub hidden_interval_ms: u64,
    pub acquire_timeout_ms: u64,
    pub max_fix_age_ms: u64,
    pub high_accuracy: bool,
    /// Chance that a single interaction event triggers a sample.
    pub opportunistic_probability: f64,
    pub start_delay_ms: u64,
    pub history_cap: usize,
    pub history_key: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: 300_000,
            background_interval_ms: 600_000,
            hidden_interval_ms: 900_000,
            acquire_timeout_ms: 15_000,
            max_fix_age_ms: 300_000,
            high_accuracy: false,
            opportunistic_probability: 0.3,
            start_delay_ms: 30_000,
            history_cap: 100,
            history_key: "stealth_location_data".to_string(),
        }
    }
}

impl SamplerConfig {
    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            timeout: Duration::from_millis(self.acquire_timeout_ms),
            max_fix_age: Duration::from_millis(self.max_fix_age_ms),
            high_accuracy: self.high_accuracy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Capacity of the bounded store, counted in UTF-8 bytes of keys and values.
    pub quota_bytes: usize,
    /// Segment length, in characters, for chunked writes.
    pub chunk_size: usize,
    /// Directory of the secondary LMDB store. In-memory when absent.
    pub secondary_path: Option<PathBuf>,
    pub secondary_max_size_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_bytes: 5 * 1024 * 1024,
            chunk_size: 8000,
            secondary_path: None,
            secondary_max_size_mb: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            storage_key: "waypost:sync-queue:v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub active_minutes: f64,
    pub idle_minutes: f64,
    pub refresh_interval_ms: u64,
    pub history_view_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            active_minutes: 10.0,
            idle_minutes: 60.0,
            refresh_interval_ms: 30_000,
            history_view_limit: 15,
        }
    }
}

impl MonitorConfig {
    pub fn thresholds(&self) -> FreshnessThresholds {
        FreshnessThresholds {
            active_minutes: self.active_minutes,
            idle_minutes: self.idle_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub max_entries: usize,
    pub storage_key: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            storage_key: "audit_logs".to_string(),
        }
    }
}

impl WaypostConfig {
    /// Load from `--config <path>` or `WAYPOST_CONFIG`, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: WaypostConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampler;
        if s.active_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sampler.active_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if s.background_interval_ms <= s.active_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "sampler.background_interval_ms",
                reason: "must be > active_interval_ms".to_string(),
            });
        }
        if s.hidden_interval_ms <= s.background_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "sampler.hidden_interval_ms",
                reason: "must be > background_interval_ms".to_string(),
            });
        }
        if s.acquire_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sampler.acquire_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&s.opportunistic_probability) {
            return Err(ConfigError::InvalidValue {
                field: "sampler.opportunistic_probability",
                reason: "must be within 0.0..=1.0".to_string(),
            });
        }
        if s.history_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sampler.history_cap",
                reason: "must be > 0".to_string(),
            });
        }
        if s.history_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sampler.history_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.storage.quota_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.quota_bytes",
                reason: "must be > 0".to_string(),
            });
        }
        if self.storage.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.chunk_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.storage.secondary_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.secondary_max_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.poll_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.queue.storage_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "queue.storage_key",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.monitor.active_minutes.is_finite() || self.monitor.active_minutes < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.active_minutes",
                reason: "must be a finite number >= 0".to_string(),
            });
        }
        if !self.monitor.idle_minutes.is_finite()
            || self.monitor.idle_minutes < self.monitor.active_minutes
        {
            return Err(ConfigError::InvalidValue {
                field: "monitor.idle_minutes",
                reason: "must be finite and >= active_minutes".to_string(),
            });
        }
        if self.monitor.refresh_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.refresh_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.audit.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audit.max_entries",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("WAYPOST_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
