//! Capped per-entity location history.
//!
//! The whole entity → samples map is one persisted value. Every append is a
//! read-modify-write of that value under a single async lock, so concurrent
//! appends cannot lose each other's samples. The last map seen is kept in
//! memory and stays authoritative for the session even when persisting it
//! fails.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use waypost_core::{
    latest_from_history, HistoryMap, LatestByEntity, LocationSample, Provenance, ValidationError,
};

use crate::adapter::{PersistenceAdapter, WriteOutcome};

pub const DEFAULT_HISTORY_KEY: &str = "stealth_location_data";
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// The newest samples of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub entity_id: String,
    /// Total retained samples for the entity.
    pub total: usize,
    /// Newest first.
    pub samples: Vec<LocationSample>,
}

pub struct HistoryStore {
    adapter: Arc<PersistenceAdapter>,
    key: String,
    cap: usize,
    cache: Mutex<Option<HistoryMap>>,
}

impl HistoryStore {
    pub fn new(adapter: Arc<PersistenceAdapter>) -> Self {
        Self {
            adapter,
            key: DEFAULT_HISTORY_KEY.to_string(),
            cap: DEFAULT_HISTORY_CAP,
            cache: Mutex::new(None),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Maximum samples kept per entity. Zero is treated as one.
    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn adapter(&self) -> &Arc<PersistenceAdapter> {
        &self.adapter
    }

    /// Append a validated sample, evicting the oldest beyond the cap.
    pub async fn append(&self, sample: LocationSample) -> Result<WriteOutcome, ValidationError> {
        sample.validate()?;

        let mut cache = self.cache.lock().await;
        let mut map = match cache.take() {
            Some(map) => map,
            None => self.load_persisted().await,
        };

        let entity_id = sample.entity_id.clone();
        let samples = map.entry(entity_id.clone()).or_default();
        samples.push(sample);
        if samples.len() > self.cap {
            let excess = samples.len() - self.cap;
            samples.drain(..excess);
        }
        let retained = samples.len();

        let outcome = self.adapter.write(&self.key, &map).await;
        match &outcome {
            WriteOutcome::Stored { method } => {
                debug!(entity_id = %entity_id, retained, method = method.as_str(), "history appended")
            }
            WriteOutcome::Failed { error } => {
                warn!(entity_id = %entity_id, error = %error, "history kept in memory only")
            }
        }
        *cache = Some(map);
        Ok(outcome)
    }

    /// The full history map.
    pub async fn load(&self) -> HistoryMap {
        let mut cache = self.cache.lock().await;
        if let Some(map) = cache.as_ref() {
            return map.clone();
        }
        let map = self.load_persisted().await;
        *cache = Some(map.clone());
        map
    }

    /// Last sample of every entity, tagged as cached.
    pub async fn latest_per_entity(&self) -> LatestByEntity {
        latest_from_history(&self.load().await, Provenance::Cached)
    }

    /// Newest `limit` samples of one entity, newest first.
    pub async fn recent(&self, entity_id: &str, limit: usize) -> HistoryView {
        let map = self.load().await;
        let samples = map.get(entity_id).map(Vec::as_slice).unwrap_or_default();
        HistoryView {
            entity_id: entity_id.to_string(),
            total: samples.len(),
            samples: samples.iter().rev().take(limit).cloned().collect(),
        }
    }

    async fn load_persisted(&self) -> HistoryMap {
        self.adapter
            .read::<HistoryMap>(&self.key)
            .await
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("key", &self.key)
            .field("cap", &self.cap)
            .finish()
    }
}
