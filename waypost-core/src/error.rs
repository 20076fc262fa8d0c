//! Error types for waypost operations

use std::time::Duration;
use thiserror::Error;

/// Failures of a single-shot location read.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AcquisitionError {
    #[error("Location acquisition timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid fix: {0}")]
    InvalidFix(#[from] ValidationError),
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Quota exceeded writing {key}: {requested} bytes requested, {available} available")]
    QuotaExceeded {
        key: String,
        requested: usize,
        available: usize,
    },

    #[error("Codec error on {key}: {reason}")]
    Codec { key: String, reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Secondary store failure: {reason}")]
    Secondary { reason: String },

    #[error("All persistence strategies exhausted for {key}: {reason}")]
    Degraded { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Remote write failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Remote rejected {action}: {reason}")]
    Rejected { action: String, reason: String },

    #[error("Remote unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Remote call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("No connectivity")]
    Offline,

    #[error("Malformed payload for {action}: {reason}")]
    MalformedPayload { action: String, reason: String },
}

/// Remote read failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Feed fetch failed: {reason}")]
    FetchFailed { reason: String },

    #[error("Feed closed")]
    Closed,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Non-finite coordinate: lat={lat}, lng={lng}")]
    NonFiniteCoordinate { lat: f64, lng: f64 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or WAYPOST_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to install tracing subscriber: {reason}")]
    Telemetry { reason: String },
}

/// Master error type for all waypost errors.
#[derive(Debug, Error)]
pub enum WaypostError {
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for waypost operations.
pub type WaypostResult<T> = Result<T, WaypostError>;

// =============================================================================
// TESTS
// =============================================================================
