//! Sampling tiers and their intervals.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use waypost_core::{EnvironmentSignal, SamplerConfig, ValidationError};

/// How visible the client currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingTier {
    /// Foreground and focused.
    Active,
    /// Foreground, focus lost.
    Backgrounded,
    /// Not visible at all.
    Hidden,
}

impl SamplingTier {
    /// The tier a signal moves to, if it is a focus or visibility signal.
    pub fn from_signal(signal: EnvironmentSignal) -> Option<Self> {
        match signal {
            EnvironmentSignal::FocusGained | EnvironmentSignal::Visible => Some(Self::Active),
            EnvironmentSignal::FocusLost => Some(Self::Backgrounded),
            EnvironmentSignal::Hidden => Some(Self::Hidden),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Backgrounded => "backgrounded",
            Self::Hidden => "hidden",
        }
    }
}

impl std::fmt::Display for SamplingTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Re-sampling interval per tier. Strictly increasing from active to hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierIntervals {
    active: Duration,
    backgrounded: Duration,
    hidden: Duration,
}

impl TierIntervals {
    pub fn new(
        active: Duration,
        backgrounded: Duration,
        hidden: Duration,
    ) -> Result<Self, ValidationError> {
        if active.is_zero() {
            return Err(ValidationError::InvalidValue {
                field: "active".to_string(),
                reason: "interval must be positive".to_string(),
            });
        }
        if !(active < backgrounded && backgrounded < hidden) {
            return Err(ValidationError::InvalidValue {
                field: "intervals".to_string(),
                reason: format!(
                    "must increase strictly: {active:?} < {backgrounded:?} < {hidden:?}"
                ),
            });
        }
        Ok(Self {
            active,
            backgrounded,
            hidden,
        })
    }

    pub fn from_config(config: &SamplerConfig) -> Result<Self, ValidationError> {
        Self::new(
            Duration::from_millis(config.active_interval_ms),
            Duration::from_millis(config.background_interval_ms),
            Duration::from_millis(config.hidden_interval_ms),
        )
    }

    pub fn interval(&self, tier: SamplingTier) -> Duration {
        match tier {
            SamplingTier::Active => self.active,
            SamplingTier::Backgrounded => self.backgrounded,
            SamplingTier::Hidden => self.hidden,
        }
    }
}

impl Default for TierIntervals {
    /// 5, 10 and 15 minutes.
    fn default() -> Self {
        Self {
            active: Duration::from_secs(5 * 60),
            backgrounded: Duration::from_secs(10 * 60),
            hidden: Duration::from_secs(15 * 60),
        }
    }
}
