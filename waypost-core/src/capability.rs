//! Capabilities supplied by the host platform and the remote authority.
//!
//! Everything the pipeline talks to but does not own is behind one of these
//! traits: the platform geolocation API, the remote write API, the remote
//! "latest per entity" read API and the local audit sink.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    AcquisitionError, AuditEvent, DeliveryError, FeedError, LatestByEntity, LocationSample,
    WaypostResult,
};

/// Options for a single location read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquireOptions {
    /// Upper bound on the whole read.
    pub timeout: Duration,
    /// Oldest cached platform fix that may be returned instead of a fresh one.
    pub max_fix_age: Duration,
    pub high_accuracy: bool,
}

impl Default for AcquireOptions {
    /// Low-cost settings: coarse accuracy, generous timeout and cache age.
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_fix_age: Duration::from_secs(300),
            high_accuracy: false,
        }
    }
}

/// A raw platform fix, before it is attributed to an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
}

/// Platform geolocation.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_fix(&self, options: &AcquireOptions) -> Result<Fix, AcquisitionError>;
}

/// Remote write API of the authority.
///
/// Implementations are expected to bound their own network calls.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn push_sample(&self, sample: &LocationSample) -> Result<(), DeliveryError>;

    async fn push_session_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError>;

    async fn push_bulk_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError>;

    async fn push_audit_event(&self, event: &AuditEvent) -> Result<(), DeliveryError>;
}

/// Pull-based remote read of the latest sample per entity.
#[async_trait]
pub trait LatestFetcher: Send + Sync {
    async fn fetch_latest(&self) -> Result<LatestByEntity, FeedError>;
}

/// Somewhere audit events end up.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> WaypostResult<()>;
}
