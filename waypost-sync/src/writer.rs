//! Direct-then-enqueue delivery.
//!
//! [`SyncingWriter`] wraps a [`RemoteWriter`] and a [`DeliveryQueue`]. Each
//! write is attempted directly when the bus reports connectivity; on failure,
//! or when offline, the write is queued as a [`SyncTask`] instead. The
//! wrapper is itself a `RemoteWriter`, so callers can take the augmented
//! capability wherever they took the plain one.
//!
//! [`SyncTask`]: waypost_core::SyncTask

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use waypost_core::{
    AuditEvent, DeliveryError, LocationSample, RemoteWriter, StorageError, SyncAction,
    ValidationError,
};
use waypost_storage::WriteOutcome;

use crate::queue::DeliveryQueue;

/// What happened to one write.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    Queued {
        task_id: Uuid,
        /// Why the direct write was not used.
        cause: DeliveryError,
        write: WriteOutcome,
    },
    /// The payload could not be serialized for queueing.
    Failed { error: StorageError },
    /// The payload failed validation; it was neither sent nor queued.
    Rejected { error: ValidationError },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, DeliveryOutcome::Queued { .. })
    }
}

pub struct SyncingWriter {
    remote: Arc<dyn RemoteWriter>,
    queue: Arc<DeliveryQueue>,
}

impl SyncingWriter {
    /// Wrap the queue's own remote writer.
    pub fn new(queue: Arc<DeliveryQueue>) -> Self {
        Self {
            remote: Arc::clone(queue.remote()),
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub async fn save_sample(&self, sample: &LocationSample) -> DeliveryOutcome {
        if let Err(error) = sample.validate() {
            warn!(entity_id = %sample.entity_id, error = %error, "invalid sample not delivered");
            return DeliveryOutcome::Rejected { error };
        }
        let direct = async { self.remote.push_sample(sample).await };
        self.deliver(SyncAction::PushSample, sample, direct).await
    }

    pub async fn save_session_state(&self, state: &serde_json::Value) -> DeliveryOutcome {
        let direct = async { self.remote.push_session_state(state).await };
        self.deliver(SyncAction::PushSessionState, state, direct).await
    }

    pub async fn set_bulk_state(&self, state: &serde_json::Value) -> DeliveryOutcome {
        let direct = async { self.remote.push_bulk_state(state).await };
        self.deliver(SyncAction::PushBulkState, state, direct).await
    }

    pub async fn record_audit_event(&self, event: &AuditEvent) -> DeliveryOutcome {
        let direct = async { self.remote.push_audit_event(event).await };
        self.deliver(SyncAction::PushAuditEvent, event, direct).await
    }

    async fn deliver<T, F>(&self, action: SyncAction, payload: &T, direct: F) -> DeliveryOutcome
    where
        T: Serialize + ?Sized,
        F: std::future::Future<Output = Result<(), DeliveryError>>,
    {
        let cause = if self.queue.signals().is_online() {
            match direct.await {
                Ok(()) => return DeliveryOutcome::Delivered,
                Err(e) => e,
            }
        } else {
            DeliveryError::Offline
        };

        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                return DeliveryOutcome::Failed {
                    error: StorageError::Serialization {
                        key: action.to_string(),
                        reason: e.to_string(),
                    },
                }
            }
        };
        let outcome = match self.queue.enqueue(action, payload).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(action = %action, error = %error, "payload rejected by queue");
                return DeliveryOutcome::Rejected { error };
            }
        };
        debug!(task_id = %outcome.task.id, action = %action, cause = %cause, "direct write deferred");
        DeliveryOutcome::Queued {
            task_id: outcome.task.id,
            cause,
            write: outcome.write,
        }
    }
}

fn into_result(outcome: DeliveryOutcome) -> Result<(), DeliveryError> {
    match outcome {
        DeliveryOutcome::Delivered | DeliveryOutcome::Queued { .. } => Ok(()),
        DeliveryOutcome::Failed { error } => Err(DeliveryError::MalformedPayload {
            action: "enqueue".to_string(),
            reason: error.to_string(),
        }),
        DeliveryOutcome::Rejected { error } => Err(DeliveryError::MalformedPayload {
            action: "validate".to_string(),
            reason: error.to_string(),
        }),
    }
}

/// `Ok` means delivered or queued.
#[async_trait]
impl RemoteWriter for SyncingWriter {
    async fn push_sample(&self, sample: &LocationSample) -> Result<(), DeliveryError> {
        into_result(self.save_sample(sample).await)
    }

    async fn push_session_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        into_result(self.save_session_state(state).await)
    }

    async fn push_bulk_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        into_result(self.set_bulk_state(state).await)
    }

    async fn push_audit_event(&self, event: &AuditEvent) -> Result<(), DeliveryError> {
        into_result(self.record_audit_event(event).await)
    }
}
