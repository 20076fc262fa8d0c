//! WAYPOST Storage - Degrading persistence for the telemetry pipeline
//!
//! Values go to a small, quota-limited text store first and degrade through
//! compression and chunking to a secondary embedded store when the quota runs
//! out. On top of that adapter sit the capped entity history and the local
//! audit trail.

pub mod adapter;
pub mod audit_log;
pub mod codec;
pub mod history;
pub mod quota;
pub mod secondary;

pub use adapter::{
    PersistenceAdapter, RemoveOutcome, StorageMethod, WriteOutcome, DEFAULT_CHUNK_SIZE,
};
pub use audit_log::{AuditFilter, LocalAuditLog, DEFAULT_AUDIT_KEY, DEFAULT_MAX_AUDIT_ENTRIES};
pub use codec::TextCodec;
pub use history::{HistoryStore, HistoryView, DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_KEY};
pub use quota::{MemoryQuotaStore, QuotaStore, QuotaUsage};
pub use secondary::{InMemorySecondaryStore, LmdbSecondaryStore, LmdbStoreError, SecondaryStore};

use std::sync::Arc;

use waypost_core::{StorageConfig, WaypostResult};

/// Build an adapter from configuration.
///
/// Uses LMDB when `secondary_path` is set, an in-memory secondary otherwise.
pub fn adapter_from_config(config: &StorageConfig) -> WaypostResult<PersistenceAdapter> {
    let bounded: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new(config.quota_bytes));
    let secondary: Arc<dyn SecondaryStore> = match &config.secondary_path {
        Some(path) => Arc::new(
            LmdbSecondaryStore::open(path, config.secondary_max_size_mb)
                .map_err(waypost_core::StorageError::from)?,
        ),
        None => Arc::new(InMemorySecondaryStore::new()),
    };
    Ok(PersistenceAdapter::new(bounded, secondary).with_chunk_size(config.chunk_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_adapter_from_default_config() {
        let adapter = adapter_from_config(&StorageConfig::default()).expect("build should succeed");
        let outcome = adapter.write("k", &json!({"ok": true})).await;
        assert_eq!(outcome.method(), Some(StorageMethod::Direct));
    }

    #[tokio::test]
    async fn test_adapter_from_config_with_lmdb() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let config = StorageConfig {
            quota_bytes: 8,
            secondary_path: Some(dir.path().join("secondary")),
            secondary_max_size_mb: 10,
            ..StorageConfig::default()
        };
        let adapter = adapter_from_config(&config).expect("build should succeed");
        let outcome = adapter.write("history", &json!(["a", "b", "c", "d"])).await;
        assert_eq!(outcome.method(), Some(StorageMethod::Secondary));
        assert_eq!(
            adapter.read::<Vec<String>>("history").await,
            Some(vec!["a".into(), "b".into(), "c".into(), "d".into()])
        );
    }
}
