//! Remote-first audit sink.
//!
//! Sends each event to the authority and falls back to the wrapped local
//! sink when offline or when the remote write fails.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use waypost_core::{AuditEvent, AuditSink, RemoteWriter, SignalBus, WaypostResult};

pub struct RemoteFirstAudit<S> {
    remote: Arc<dyn RemoteWriter>,
    signals: Arc<SignalBus>,
    fallback: S,
}

impl<S: AuditSink> RemoteFirstAudit<S> {
    pub fn new(remote: Arc<dyn RemoteWriter>, signals: Arc<SignalBus>, fallback: S) -> Self {
        Self {
            remote,
            signals,
            fallback,
        }
    }

    pub fn fallback(&self) -> &S {
        &self.fallback
    }
}

#[async_trait]
impl<S: AuditSink> AuditSink for RemoteFirstAudit<S> {
    async fn record(&self, event: AuditEvent) -> WaypostResult<()> {
        if self.signals.is_online() {
            match self.remote.push_audit_event(&event).await {
                Ok(()) => {
                    debug!(event_id = %event.id, "audit event sent");
                    return Ok(());
                }
                Err(e) => debug!(event_id = %event.id, error = %e, "audit send failed, keeping locally"),
            }
        }
        self.fallback.record(event).await
    }
}
