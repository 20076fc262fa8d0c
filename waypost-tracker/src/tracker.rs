//! Client-side assembly of the pipeline from configuration.

use std::sync::Arc;
use std::time::Duration;

use waypost_core::{
    EntityId, LocationProvider, RemoteWriter, SignalBus, WaypostConfig, WaypostResult,
};
use waypost_storage::{adapter_from_config, HistoryStore, LocalAuditLog, PersistenceAdapter};
use waypost_sync::{DeliveryQueue, FlushDriver, RemoteFirstAudit, SyncingWriter};

use crate::sampler::{LocationSampler, SamplerOptions};
use crate::source::SampleSource;

/// Everything a tracked client runs: storage, history, the delivery queue
/// with its flush driver, the sampler and the audit trail.
///
/// Must be built inside a tokio runtime. Dropping it stops the flush driver
/// and the sampler.
pub struct Tracker {
    adapter: Arc<PersistenceAdapter>,
    history: Arc<HistoryStore>,
    queue: Arc<DeliveryQueue>,
    writer: Arc<SyncingWriter>,
    sampler: Arc<LocationSampler>,
    audit: Arc<RemoteFirstAudit<LocalAuditLog>>,
    options: SamplerOptions,
    _flush: FlushDriver,
}

impl Tracker {
    pub fn from_config(
        config: &WaypostConfig,
        provider: Arc<dyn LocationProvider>,
        remote: Arc<dyn RemoteWriter>,
        signals: Arc<SignalBus>,
    ) -> WaypostResult<Self> {
        config.validate()?;
        let adapter = Arc::new(adapter_from_config(&config.storage)?);
        Self::with_adapter(config, adapter, provider, remote, signals)
    }

    /// Like [`Tracker::from_config`] but over an existing adapter.
    pub fn with_adapter(
        config: &WaypostConfig,
        adapter: Arc<PersistenceAdapter>,
        provider: Arc<dyn LocationProvider>,
        remote: Arc<dyn RemoteWriter>,
        signals: Arc<SignalBus>,
    ) -> WaypostResult<Self> {
        config.validate()?;
        let options = SamplerOptions::from_config(&config.sampler)?;

        let history = Arc::new(
            HistoryStore::new(Arc::clone(&adapter))
                .with_key(config.sampler.history_key.clone())
                .with_cap(config.sampler.history_cap),
        );
        let queue = Arc::new(
            DeliveryQueue::new(Arc::clone(&adapter), Arc::clone(&remote), Arc::clone(&signals))
                .with_key(config.queue.storage_key.clone()),
        );
        let flush =
            queue.spawn_flush_driver(Duration::from_millis(config.queue.poll_interval_ms));
        let writer = Arc::new(SyncingWriter::new(Arc::clone(&queue)));

        let source = SampleSource::new(provider).with_options(options.acquire);
        let sampler = Arc::new(LocationSampler::new(
            source,
            Arc::clone(&history),
            Arc::clone(&writer),
        ));

        let local_audit = LocalAuditLog::new(Arc::clone(&adapter))
            .with_key(config.audit.storage_key.clone())
            .with_max_entries(config.audit.max_entries);
        let audit = Arc::new(RemoteFirstAudit::new(remote, signals, local_audit));

        Ok(Self {
            adapter,
            history,
            queue,
            writer,
            sampler,
            audit,
            options,
            _flush: flush,
        })
    }

    /// Start sampling with the configured options.
    pub async fn start(&self, entity_id: impl Into<EntityId>) -> bool {
        self.sampler.start(entity_id, self.options.clone()).await
    }

    pub async fn stop(&self) -> bool {
        self.sampler.stop().await
    }

    pub fn adapter(&self) -> &Arc<PersistenceAdapter> {
        &self.adapter
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn writer(&self) -> &Arc<SyncingWriter> {
        &self.writer
    }

    pub fn sampler(&self) -> &Arc<LocationSampler> {
        &self.sampler
    }

    pub fn audit(&self) -> &Arc<RemoteFirstAudit<LocalAuditLog>> {
        &self.audit
    }

    pub fn options(&self) -> &SamplerOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_core::{ConfigError, StorageConfig};
    use waypost_test_utils::{MockLocationProvider, MockRemoteWriter};

    #[tokio::test(start_paused = true)]
    async fn test_from_config_uses_configured_keys() {
        let mut config = WaypostConfig::default();
        config.sampler.history_key = "history:v2".to_string();
        config.sampler.history_cap = 7;
        config.queue.storage_key = "queue:v2".to_string();

        let tracker = Tracker::from_config(
            &config,
            Arc::new(MockLocationProvider::at(1.0, 2.0, 3.0)),
            Arc::new(MockRemoteWriter::new()),
            Arc::new(SignalBus::new(false)),
        )
        .expect("tracker should build");

        assert_eq!(tracker.history().key(), "history:v2");
        assert_eq!(tracker.history().cap(), 7);
        tracker
            .queue()
            .enqueue(waypost_core::SyncAction::PushBulkState, serde_json::json!({}))
            .await
            .expect("task should be accepted");
        assert!(tracker
            .adapter()
            .read::<serde_json::Value>("queue:v2")
            .await
            .is_some());
        assert_eq!(tracker.options().start_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = WaypostConfig::default();
        config.storage = StorageConfig {
            chunk_size: 0,
            ..StorageConfig::default()
        };
        let built = Tracker::from_config(
            &config,
            Arc::new(MockLocationProvider::at(1.0, 2.0, 3.0)),
            Arc::new(MockRemoteWriter::new()),
            Arc::new(SignalBus::default()),
        );
        assert!(built.is_err());
    }

    #[tokio::test]
    async fn test_non_finite_probability_rejected_over_existing_adapter() {
        let mut config = WaypostConfig::default();
        config.sampler.opportunistic_probability = f64::NAN;
        let built = Tracker::with_adapter(
            &config,
            waypost_test_utils::fixtures::memory_adapter(),
            Arc::new(MockLocationProvider::at(1.0, 2.0, 3.0)),
            Arc::new(MockRemoteWriter::new()),
            Arc::new(SignalBus::default()),
        );
        assert!(matches!(
            built,
            Err(waypost_core::WaypostError::Config(ConfigError::InvalidValue {
                field: "sampler.opportunistic_probability",
                ..
            }))
        ));
    }
}
