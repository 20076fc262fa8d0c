//! Activity classification from sample age.
//!
//! Classification is always derived from `now - captured_at` at the moment
//! of asking. Nothing here is cached.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// How recently an entity reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Active,
    Idle,
    Stale,
}

/// Inclusive upper bounds, in minutes, of the active and idle classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FreshnessThresholds {
    pub active_minutes: f64,
    pub idle_minutes: f64,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            active_minutes: 10.0,
            idle_minutes: 60.0,
        }
    }
}

impl FreshnessThresholds {
    pub fn classify(&self, captured_at: Timestamp, now: Timestamp) -> ActivityStatus {
        let minutes = minutes_between(captured_at, now);
        if minutes <= self.active_minutes {
            ActivityStatus::Active
        } else if minutes <= self.idle_minutes {
            ActivityStatus::Idle
        } else {
            ActivityStatus::Stale
        }
    }
}

/// Fractional minutes elapsed from `from` to `to`.
///
/// Samples stamped in the future count as zero minutes old.
pub fn minutes_between(from: Timestamp, to: Timestamp) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 60_000.0
}

/// Classify with the default 10 / 60 minute thresholds.
pub fn classify(captured_at: Timestamp, now: Timestamp) -> ActivityStatus {
    FreshnessThresholds::default().classify(captured_at, now)
}
