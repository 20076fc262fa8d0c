//! Deferred remote-write intents.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Timestamp;

/// The remote write a [`SyncTask`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncAction {
    PushSample,
    PushSessionState,
    PushBulkState,
    PushAuditEvent,
    /// An action this build does not know how to deliver.
    #[serde(other)]
    Unknown,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::PushSample => "pushSample",
            SyncAction::PushSessionState => "pushSessionState",
            SyncAction::PushBulkState => "pushBulkState",
            SyncAction::PushAuditEvent => "pushAuditEvent",
            SyncAction::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued remote write. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    /// Time-ordered unique id (UUIDv7: millisecond timestamp plus random bits).
    pub id: Uuid,
    pub action: SyncAction,
    pub payload: serde_json::Value,
    pub enqueued_at: Timestamp,
}

impl SyncTask {
    pub fn new(action: SyncAction, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            action,
            payload,
            enqueued_at: chrono::Utc::now(),
        }
    }
}
