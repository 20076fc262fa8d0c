//! WAYPOST Core - Data types for the resilient location telemetry pipeline
//!
//! Holds the pieces every other crate agrees on: samples and the maps built
//! from them, queued sync tasks, the error taxonomy, configuration,
//! environment signals and the traits behind which the platform and the
//! remote authority sit.

pub mod audit;
pub mod capability;
pub mod config;
pub mod error;
pub mod freshness;
pub mod sample;
pub mod signal;
pub mod task;
pub mod telemetry;

pub use audit::AuditEvent;
pub use capability::{
    AcquireOptions, AuditSink, Fix, LatestFetcher, LocationProvider, RemoteWriter,
};
pub use config::{
    AuditConfig, MonitorConfig, QueueConfig, SamplerConfig, StorageConfig, WaypostConfig,
};
pub use error::{
    AcquisitionError, ConfigError, DeliveryError, FeedError, StorageError, ValidationError,
    WaypostError, WaypostResult,
};
pub use freshness::{classify, minutes_between, ActivityStatus, FreshnessThresholds};
pub use sample::{
    latest_from_history, EntityHistory, HistoryMap, LatestByEntity, LocationSample, Provenance,
};
pub use signal::{EnvironmentSignal, InteractionKind, SignalBus};
pub use task::{SyncAction, SyncTask};
pub use telemetry::{init_tracing, LogFormat};

/// Identifier of a tracked entity (personnel number, asset tag).
pub type EntityId = String;

/// Timestamp type used throughout waypost.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
