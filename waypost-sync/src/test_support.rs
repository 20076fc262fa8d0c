//! Fixtures shared by this crate's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use waypost_core::{AuditEvent, DeliveryError, LocationSample, RemoteWriter};
use waypost_storage::{InMemorySecondaryStore, MemoryQuotaStore, PersistenceAdapter};

pub fn adapter() -> Arc<PersistenceAdapter> {
    Arc::new(PersistenceAdapter::new(
        Arc::new(MemoryQuotaStore::new(1_000_000)),
        Arc::new(InMemorySecondaryStore::new()),
    ))
}

pub fn sample(id: &str, lat: f64) -> LocationSample {
    let at = Utc.with_ymd_and_hms(2026, 4, 1, 9, 30, 0).unwrap();
    LocationSample::new(id, lat, 106.5, 50.0, at)
}

/// Remote writer that records every call and fails on demand.
#[derive(Default)]
pub struct ScriptedRemote {
    failures_left: AtomicUsize,
    delay: Mutex<Duration>,
    log: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ScriptedRemote {
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn actions(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.log.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }

    async fn call(&self, action: &str, payload: serde_json::Value) -> Result<(), DeliveryError> {
        self.log.lock().unwrap().push((action.to_string(), payload));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError::Unreachable {
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteWriter for ScriptedRemote {
    async fn push_sample(&self, sample: &LocationSample) -> Result<(), DeliveryError> {
        self.call("pushSample", serde_json::to_value(sample).unwrap()).await
    }

    async fn push_session_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        self.call("pushSessionState", state.clone()).await
    }

    async fn push_bulk_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        self.call("pushBulkState", state.clone()).await
    }

    async fn push_audit_event(&self, event: &AuditEvent) -> Result<(), DeliveryError> {
        self.call("pushAuditEvent", serde_json::to_value(event).unwrap()).await
    }
}
