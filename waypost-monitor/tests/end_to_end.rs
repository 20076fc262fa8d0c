//! Tracked client and monitor wired through a fake remote authority.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use waypost_core::{
    AuditEvent, DeliveryError, EntityId, LatestByEntity, LocationSample, Provenance, RemoteWriter,
    SignalBus, SyncAction,
};
use waypost_monitor::{Aggregator, RemoteFeed};
use waypost_storage::HistoryStore;
use waypost_sync::{DeliveryQueue, SyncingWriter};
use waypost_test_utils::assertions::{assert_cached, assert_live};
use waypost_test_utils::fixtures::memory_adapter;
use waypost_test_utils::{MockLocationProvider, MockRemoteWriter};
use waypost_tracker::{LocationSampler, SampleSource, SamplerOptions};

/// Accepts writes through a mock and streams accepted samples to monitors.
struct Authority {
    writes: MockRemoteWriter,
    stream: mpsc::Sender<(EntityId, LocationSample)>,
}

#[async_trait]
impl RemoteWriter for Authority {
    async fn push_sample(&self, sample: &LocationSample) -> Result<(), DeliveryError> {
        self.writes.push_sample(sample).await?;
        let _ = self
            .stream
            .try_send((sample.entity_id.clone(), sample.clone()));
        Ok(())
    }

    async fn push_session_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        self.writes.push_session_state(state).await
    }

    async fn push_bulk_state(&self, state: &serde_json::Value) -> Result<(), DeliveryError> {
        self.writes.push_bulk_state(state).await
    }

    async fn push_audit_event(&self, event: &AuditEvent) -> Result<(), DeliveryError> {
        self.writes.push_audit_event(event).await
    }
}

struct Client {
    sampler: Arc<LocationSampler>,
    queue: Arc<DeliveryQueue>,
}

fn client(remote: Arc<dyn RemoteWriter>, signals: Arc<SignalBus>, fix: (f64, f64, f64)) -> Client {
    let adapter = memory_adapter();
    let queue = Arc::new(DeliveryQueue::new(adapter.clone(), remote, signals));
    let writer = Arc::new(SyncingWriter::new(queue.clone()));
    let history = Arc::new(HistoryStore::new(adapter));
    let provider = Arc::new(MockLocationProvider::at(fix.0, fix.1, fix.2));
    let sampler = Arc::new(LocationSampler::new(
        SampleSource::new(provider),
        history,
        writer,
    ));
    Client { sampler, queue }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn failed_push_is_queued_then_flushed_and_seen_live() {
    let (tx, rx) = mpsc::channel(16);
    let authority = Arc::new(Authority {
        writes: MockRemoteWriter::new(),
        stream: tx,
    });
    authority.writes.fail_next(1);
    let signals = Arc::new(SignalBus::new(true));
    let client = client(authority.clone(), signals.clone(), (-6.2, 106.8, 50.0));

    let monitor = Arc::new(Aggregator::new(Arc::new(HistoryStore::new(memory_adapter()))));
    let seen: Arc<Mutex<Vec<LatestByEntity>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = monitor.subscribe(move |latest| {
        sink.lock().expect("lock").push(latest.clone());
    });
    assert!(monitor.attach(RemoteFeed::Stream(rx)));

    let options = SamplerOptions::default().with_start_delay(Duration::ZERO);
    assert!(client.sampler.start("E1", options).await);
    settle().await;

    // Direct push failed; exactly one pushSample task is waiting.
    let queued = client.queue.inspect().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].action, SyncAction::PushSample);
    assert_eq!(authority.writes.call_count(), 1);
    assert!(monitor.get_latest().await.is_empty());

    // Connectivity drops and comes back; the driver flushes on the signal.
    signals.set_online(false);
    let _driver = client.queue.spawn_flush_driver(Duration::from_secs(3600));
    settle().await;
    signals.set_online(true);
    settle().await;

    assert!(client.queue.inspect().await.is_empty());
    let latest = monitor.get_latest().await;
    assert_live(&latest, "E1");
    let e1 = &latest["E1"];
    assert_eq!((e1.lat, e1.lng, e1.accuracy), (-6.2, 106.8, 50.0));

    let notifications = seen.lock().expect("lock");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["E1"].source, Provenance::Live);
}

#[tokio::test(start_paused = true)]
async fn local_history_covers_entities_the_remote_has_not_reported() {
    let adapter = memory_adapter();
    let remote = Arc::new(MockRemoteWriter::new());
    let signals = Arc::new(SignalBus::new(false));
    let queue = Arc::new(DeliveryQueue::new(adapter.clone(), remote, signals));
    let history = Arc::new(HistoryStore::new(adapter));
    let sampler = Arc::new(LocationSampler::new(
        SampleSource::new(Arc::new(MockLocationProvider::at(-6.25, 106.75, 30.0))),
        history.clone(),
        Arc::new(SyncingWriter::new(queue)),
    ));
    sampler
        .start("E1", SamplerOptions::default().with_start_delay(Duration::ZERO))
        .await;
    settle().await;

    let monitor = Arc::new(Aggregator::new(history));
    assert_cached(&monitor.get_latest().await, "E1");

    let (tx, rx) = mpsc::channel(1);
    monitor.attach(RemoteFeed::Push(rx));
    let mut remote_view = LatestByEntity::new();
    remote_view.insert(
        "E2".to_string(),
        LocationSample::new("E2", -7.25, 110.5, 20.0, chrono::Utc::now()),
    );
    tx.send(remote_view).await.expect("feed open");
    settle().await;

    let latest = monitor.get_latest().await;
    assert_cached(&latest, "E1");
    assert_live(&latest, "E2");
    assert_eq!(monitor.status_rows(chrono::Utc::now()).await.len(), 2);
}
