//! Location samples and the collections built from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EntityId, Timestamp, ValidationError};

/// Where a sample shown to a consumer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Delivered by the remote authority's feed.
    Live,
    /// Recovered from the locally persisted history.
    #[default]
    Cached,
}

/// A single location fix for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub entity_id: EntityId,
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    pub captured_at: Timestamp,
    #[serde(default)]
    pub source: Provenance,
}

impl LocationSample {
    pub fn new(
        entity_id: impl Into<EntityId>,
        lat: f64,
        lng: f64,
        accuracy: f64,
        captured_at: Timestamp,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            lat,
            lng,
            accuracy,
            captured_at,
            source: Provenance::Cached,
        }
    }

    /// Reject samples whose coordinates are not finite numbers.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(ValidationError::NonFiniteCoordinate {
                lat: self.lat,
                lng: self.lng,
            });
        }
        if self.entity_id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "entity_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_provenance(mut self, source: Provenance) -> Self {
        self.source = source;
        self
    }
}

/// Insertion-ordered samples of one entity, oldest first.
pub type EntityHistory = Vec<LocationSample>;

/// All entity histories. Persisted as a single value.
pub type HistoryMap = BTreeMap<EntityId, EntityHistory>;

/// Most recent sample per entity. Derived, never persisted.
pub type LatestByEntity = BTreeMap<EntityId, LocationSample>;

/// Derive the latest sample of every entity from a history map.
///
/// Entities with an empty history are skipped.
pub fn latest_from_history(history: &HistoryMap, source: Provenance) -> LatestByEntity {
    history
        .iter()
        .filter_map(|(id, samples)| {
            samples
                .last()
                .map(|s| (id.clone(), s.clone().with_provenance(source)))
        })
        .collect()
}
