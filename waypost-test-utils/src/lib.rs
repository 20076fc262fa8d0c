//! WAYPOST Test Utilities
//!
//! Shared test infrastructure for the waypost workspace:
//! - Mock collaborators (platform location, remote writer, remote feed)
//! - Proptest generators for samples and history maps
//! - Fixtures for adapters, buses and the sync stack
//! - Assertions on provenance and storage outcomes

pub use waypost_core::{
    AcquireOptions, AcquisitionError, DeliveryError, EntityId, EnvironmentSignal, FeedError, Fix,
    HistoryMap, LatestByEntity, LatestFetcher, LocationProvider, LocationSample, Provenance,
    RemoteWriter, SignalBus, SyncAction, Timestamp,
};
pub use waypost_storage::{PersistenceAdapter, StorageMethod, WriteOutcome};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use waypost_core::AuditEvent;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("mock state lock poisoned")
}

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Platform location source returning scripted results.
///
/// Queued results are consumed first; after that every read returns the
/// current default.
pub struct MockLocationProvider {
    default: Mutex<Result<Fix, AcquisitionError>>,
    script: Mutex<VecDeque<Result<Fix, AcquisitionError>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl MockLocationProvider {
    pub fn new(fix: Fix) -> Self {
        Self {
            default: Mutex::new(Ok(fix)),
            script: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn at(lat: f64, lng: f64, accuracy: f64) -> Self {
        Self::new(Fix { lat, lng, accuracy })
    }

    pub fn failing(error: AcquisitionError) -> Self {
        let provider = Self::at(0.0, 0.0, 0.0);
        *lock(&provider.default) = Err(error);
        provider
    }

    pub fn set_fix(&self, fix: Fix) {
        *lock(&self.default) = Ok(fix);
    }

    pub fn set_error(&self, error: AcquisitionError) {
        *lock(&self.default) = Err(error);
    }

    /// Queue a one-off result ahead of the default.
    pub fn push_result(&self, result: Result<Fix, AcquisitionError>) {
        lock(&self.script).push_back(result);
    }

    /// Make every read take this long (tokio time).
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for MockLocationProvider {
    async fn current_fix(&self, _options: &AcquireOptions) -> Result<Fix, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(result) => result,
            None => lock(&self.default).clone(),
        }
    }
}

/// One call received by [`MockRemoteWriter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub action: SyncAction,
    pub payload: serde_json::Value,
    pub accepted: bool,
}

/// Remote authority that records every call and fails on demand.
#[derive(Default)]
pub struct MockRemoteWriter {
    failures_left: AtomicUsize,
    down: AtomicBool,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MockRemoteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched back.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Calls that succeeded, in arrival order.
    pub fn accepted(&self) -> Vec<RemoteCall> {
        lock(&self.calls).iter().filter(|c| c.accepted).cloned().collect()
    }

    pub fn accepted_samples(&self) -> Vec<LocationSample> {
        self.accepted()
            .into_iter()
            .filter(|c| c.action == SyncAction::PushSample)
            .filter_map(|c| serde_json::from_value(c.payload).ok())
            .collect()
    }

    fn record(&self, action: SyncAction, payload: serde_json::Value) -> Result<(), DeliveryError> {
        let failing = self.down.load(Ordering::SeqCst)
            || self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        lock(&self.calls).push(RemoteCall {
            action,
            payload,
            accepted: !failing,
        });
        if failing {
            Err(DeliveryError::Unreachable {
                reason: "mock remote unreachable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[async_trait]
impl RemoteWriter for MockRemoteWriter {
    async fn push_sample(&self, sample: &LocationSample) -> Result<(), DeliveryError> {
        self.record(SyncAction::PushSample, to_json(sample))
    }

    async fn push_session_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        self.record(SyncAction::PushSessionState, state.clone())
    }

    async fn push_bulk_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        self.record(SyncAction::PushBulkState, state.clone())
    }

    async fn push_audit_event(&self, event: &AuditEvent) -> Result<(), DeliveryError> {
        self.record(SyncAction::PushAuditEvent, to_json(event))
    }
}

/// Pull-based remote feed serving a settable snapshot.
#[derive(Default)]
pub struct MockLatestFetcher {
    snapshot: Mutex<LatestByEntity>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockLatestFetcher {
    pub fn new(snapshot: LatestByEntity) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    pub fn set_snapshot(&self, snapshot: LatestByEntity) {
        *lock(&self.snapshot) = snapshot;
    }

    pub fn insert(&self, sample: LocationSample) {
        lock(&self.snapshot).insert(sample.entity_id.clone(), sample);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LatestFetcher for MockLatestFetcher {
    async fn fetch_latest(&self) -> Result<LatestByEntity, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedError::FetchFailed {
                reason: "mock feed down".to_string(),
            });
        }
        Ok(lock(&self.snapshot).clone())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for waypost data.
    //!
    //! Coordinates are multiples of 1/1024 so they survive a JSON round trip
    //! bit for bit.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        "[A-Z][0-9]{1,3}"
    }

    /// Timestamps between 2020 and 2030, whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    pub fn arb_latitude() -> impl Strategy<Value = f64> {
        (-92_160i64..=92_160).prop_map(|n| n as f64 / 1024.0)
    }

    pub fn arb_longitude() -> impl Strategy<Value = f64> {
        (-184_320i64..=184_320).prop_map(|n| n as f64 / 1024.0)
    }

    pub fn arb_sample_for(entity_id: EntityId) -> impl Strategy<Value = LocationSample> {
        (arb_latitude(), arb_longitude(), 1u32..5000, arb_timestamp()).prop_map(
            move |(lat, lng, accuracy, at)| {
                LocationSample::new(entity_id.clone(), lat, lng, accuracy as f64, at)
            },
        )
    }

    pub fn arb_sample() -> impl Strategy<Value = LocationSample> {
        arb_entity_id().prop_flat_map(arb_sample_for)
    }

    /// Up to `entities` entities with up to `per_entity` samples each, in
    /// capture order.
    pub fn arb_history_map(entities: usize, per_entity: usize) -> impl Strategy<Value = HistoryMap> {
        prop::collection::btree_map(
            arb_entity_id(),
            prop::collection::vec((arb_latitude(), arb_longitude(), arb_timestamp()), 1..=per_entity.max(1)),
            0..=entities,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .map(|(id, mut points)| {
                    points.sort_by_key(|(_, _, at)| *at);
                    let samples = points
                        .into_iter()
                        .map(|(lat, lng, at)| LocationSample::new(id.clone(), lat, lng, 25.0, at))
                        .collect();
                    (id, samples)
                })
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made pipeline pieces.

    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use waypost_storage::{InMemorySecondaryStore, MemoryQuotaStore};
    use waypost_sync::{DeliveryQueue, SyncingWriter};

    /// 2026-03-02 08:00:00 UTC.
    pub fn base_time() -> Timestamp {
        chrono::Utc
            .with_ymd_and_hms(2026, 3, 2, 8, 0, 0)
            .single()
            .expect("fixed timestamp is valid")
    }

    pub fn sample(entity_id: &str, lat: f64, lng: f64) -> LocationSample {
        LocationSample::new(entity_id, lat, lng, 50.0, base_time())
    }

    /// A sample captured `minutes` before `now`.
    pub fn sample_aged(entity_id: &str, now: Timestamp, minutes: i64) -> LocationSample {
        LocationSample::new(
            entity_id,
            -6.25,
            106.75,
            50.0,
            now - chrono::Duration::minutes(minutes),
        )
    }

    /// Adapter with a roomy quota and in-memory secondary store.
    pub fn memory_adapter() -> Arc<PersistenceAdapter> {
        adapter_with_quota(5 * 1024 * 1024)
    }

    /// Adapter whose bounded store holds only `quota_bytes`.
    pub fn adapter_with_quota(quota_bytes: usize) -> Arc<PersistenceAdapter> {
        Arc::new(PersistenceAdapter::new(
            Arc::new(MemoryQuotaStore::new(quota_bytes)),
            Arc::new(InMemorySecondaryStore::new()),
        ))
    }

    /// Queue plus direct-then-enqueue writer over a mock remote.
    pub struct SyncStack {
        pub adapter: Arc<PersistenceAdapter>,
        pub remote: Arc<MockRemoteWriter>,
        pub signals: Arc<SignalBus>,
        pub queue: Arc<DeliveryQueue>,
        pub writer: Arc<SyncingWriter>,
    }

    pub fn sync_stack(online: bool) -> SyncStack {
        let adapter = memory_adapter();
        let remote = Arc::new(MockRemoteWriter::new());
        let signals = Arc::new(SignalBus::new(online));
        let queue = Arc::new(DeliveryQueue::new(
            adapter.clone(),
            remote.clone(),
            signals.clone(),
        ));
        let writer = Arc::new(SyncingWriter::new(queue.clone()));
        SyncStack {
            adapter,
            remote,
            signals,
            queue,
            writer,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on waypost outcomes.

    use super::*;

    pub fn assert_live(latest: &LatestByEntity, entity_id: &str) {
        let sample = latest
            .get(entity_id)
            .unwrap_or_else(|| panic!("no latest sample for {entity_id}"));
        assert_eq!(sample.source, Provenance::Live, "{entity_id} should be live");
    }

    pub fn assert_cached(latest: &LatestByEntity, entity_id: &str) {
        let sample = latest
            .get(entity_id)
            .unwrap_or_else(|| panic!("no latest sample for {entity_id}"));
        assert_eq!(sample.source, Provenance::Cached, "{entity_id} should be cached");
    }

    pub fn assert_stored_via(outcome: &WriteOutcome, expected: StorageMethod) {
        assert_eq!(
            outcome.method(),
            Some(expected),
            "expected storage via {}, got {:?}",
            expected.as_str(),
            outcome
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_mock_provider_script_then_default() {
        let provider = MockLocationProvider::at(-6.2, 106.8, 50.0);
        provider.push_result(Err(AcquisitionError::PermissionDenied));

        let options = AcquireOptions::default();
        assert_eq!(
            provider.current_fix(&options).await,
            Err(AcquisitionError::PermissionDenied)
        );
        let fix = provider.current_fix(&options).await.expect("default fix");
        assert_eq!(fix.lat, -6.2);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_remote_fail_next_recovers() {
        let remote = MockRemoteWriter::new();
        remote.fail_next(1);
        let s = fixtures::sample("E1", -6.25, 106.75);
        assert!(remote.push_sample(&s).await.is_err());
        assert!(remote.push_sample(&s).await.is_ok());
        assert_eq!(remote.call_count(), 2);
        assert_eq!(remote.accepted_samples(), vec![s]);
    }

    #[tokio::test]
    async fn test_mock_fetcher_failing() {
        let fetcher = MockLatestFetcher::default();
        fetcher.insert(fixtures::sample("E1", 1.0, 2.0));
        assert_eq!(fetcher.fetch_latest().await.expect("snapshot").len(), 1);
        fetcher.set_failing(true);
        assert!(fetcher.fetch_latest().await.is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_samples_are_valid(sample in generators::arb_sample()) {
            prop_assert!(sample.validate().is_ok());
        }

        #[test]
        fn prop_generated_history_is_in_capture_order(map in generators::arb_history_map(4, 6)) {
            for samples in map.values() {
                prop_assert!(samples.windows(2).all(|w| w[0].captured_at <= w[1].captured_at));
            }
        }
    }
}
