//! Tracing subscriber setup.
//!
//! The filter comes from `WAYPOST_LOG`, then `RUST_LOG`, then
//! [`DEFAULT_DIRECTIVE`].

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::ConfigError;

pub const DEFAULT_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Build the env filter without installing anything.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("WAYPOST_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global subscriber.
///
/// Fails instead of panicking when a subscriber is already installed, so
/// tests and embedding hosts can call it freely.
pub fn init_tracing(format: LogFormat) -> Result<(), ConfigError> {
    let registry = tracing_subscriber::registry().with(env_filter());
    let result = match format {
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|e| ConfigError::Telemetry {
        reason: e.to_string(),
    })
}
