//! Latest-per-entity aggregation.
//!
//! The remote view is authoritative wherever it has a value. Entities the
//! remote has never reported fall back to the last sample of their locally
//! persisted history, tagged [`Provenance::Cached`]. Merging is a shallow
//! per-entity override and happens on every read.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use waypost_core::{
    minutes_between, ActivityStatus, EntityId, FreshnessThresholds, LatestByEntity,
    LocationSample, MonitorConfig, Provenance, StorageError, Timestamp, WaypostResult,
};
use waypost_storage::{HistoryStore, HistoryView};

use crate::feed::RemoteFeed;

pub const DEFAULT_HISTORY_VIEW_LIMIT: usize = 15;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

type Listener = Arc<dyn Fn(&LatestByEntity) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Overlay `remote` on `local`: remote entries win and are tagged live,
/// local-only entries stay cached.
pub fn merge_latest(remote: &LatestByEntity, local: LatestByEntity) -> LatestByEntity {
    let mut merged: LatestByEntity = local
        .into_iter()
        .map(|(id, s)| (id, s.with_provenance(Provenance::Cached)))
        .collect();
    for (id, sample) in remote {
        merged.insert(id.clone(), sample.clone().with_provenance(Provenance::Live));
    }
    merged
}

/// Handle returned by [`Aggregator::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).entries.remove(&self.id);
        }
    }
}

/// One rendered row of the freshness table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    pub entity_id: EntityId,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub captured_at: Timestamp,
    pub source: Provenance,
    pub minutes_ago: f64,
    pub status: ActivityStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportSource {
    /// The remote latest-per-entity view.
    Latest,
    /// The locally persisted history map, used when the remote view is empty.
    History,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    pub filename: String,
    /// Pretty-printed JSON.
    pub contents: String,
    pub source: ExportSource,
    pub entities: usize,
}

pub fn export_filename(date: NaiveDate) -> String {
    format!("waypost-latest-{}.json", date.format("%Y-%m-%d"))
}

pub struct Aggregator {
    history: Arc<HistoryStore>,
    thresholds: FreshnessThresholds,
    history_limit: usize,
    remote: RwLock<LatestByEntity>,
    listeners: Arc<Mutex<Listeners>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Aggregator {
    pub fn new(history: Arc<HistoryStore>) -> Self {
        Self {
            history,
            thresholds: FreshnessThresholds::default(),
            history_limit: DEFAULT_HISTORY_VIEW_LIMIT,
            remote: RwLock::new(LatestByEntity::new()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            tasks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn from_config(history: Arc<HistoryStore>, config: &MonitorConfig) -> Self {
        Self::new(history)
            .with_thresholds(config.thresholds())
            .with_history_limit(config.history_view_limit)
    }

    pub fn with_thresholds(mut self, thresholds: FreshnessThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub async fn get_latest(&self) -> LatestByEntity {
        let local = self.history.latest_per_entity().await;
        let remote = self.remote.read().await;
        merge_latest(&remote, local)
    }

    /// The remote view alone, as last received.
    pub async fn remote_snapshot(&self) -> LatestByEntity {
        self.remote.read().await.clone()
    }

    /// One row per entity, classified against `now`.
    pub async fn status_rows(&self, now: Timestamp) -> Vec<StatusRow> {
        self.get_latest()
            .await
            .into_values()
            .map(|s| StatusRow {
                minutes_ago: minutes_between(s.captured_at, now),
                status: self.thresholds.classify(s.captured_at, now),
                entity_id: s.entity_id,
                lat: s.lat,
                lng: s.lng,
                accuracy: s.accuracy,
                captured_at: s.captured_at,
                source: s.source,
            })
            .collect()
    }

    /// Newest `limit` samples of one entity from local history.
    pub async fn history_view(&self, entity_id: &str, limit: usize) -> HistoryView {
        self.history.recent(entity_id, limit).await
    }

    /// [`Aggregator::history_view`] with the configured limit.
    pub async fn recent_history(&self, entity_id: &str) -> HistoryView {
        self.history_view(entity_id, self.history_limit).await
    }

    pub async fn export(&self) -> WaypostResult<ExportDocument> {
        self.export_at(Utc::now()).await
    }

    /// Serialize the remote view, or the persisted history when the remote
    /// view is empty.
    pub async fn export_at(&self, now: Timestamp) -> WaypostResult<ExportDocument> {
        let remote = self.remote_snapshot().await;
        let (rendered, source, entities) = if remote.is_empty() {
            let history = self.history.load().await;
            let entities = history.len();
            (serde_json::to_string_pretty(&history), ExportSource::History, entities)
        } else {
            let entities = remote.len();
            (serde_json::to_string_pretty(&remote), ExportSource::Latest, entities)
        };
        let filename = export_filename(now.date_naive());
        let contents = rendered.map_err(|e| StorageError::Serialization {
            key: filename.clone(),
            reason: e.to_string(),
        })?;
        info!(filename = %filename, entities, source = ?source, "export rendered");
        Ok(ExportDocument {
            filename,
            contents,
            source,
            entities,
        })
    }

    // ========================================================================
    // UPDATES
    // ========================================================================

    /// Replace the whole remote view.
    pub async fn apply_snapshot(&self, snapshot: LatestByEntity) {
        let snapshot = snapshot
            .into_iter()
            .map(|(id, s)| (id, s.with_provenance(Provenance::Live)))
            .collect();
        *self.remote.write().await = snapshot;
        self.notify().await;
    }

    /// Override one entity of the remote view.
    pub async fn apply_sample(&self, entity_id: EntityId, sample: LocationSample) {
        self.remote
            .write()
            .await
            .insert(entity_id, sample.with_provenance(Provenance::Live));
        self.notify().await;
    }

    /// Re-notify subscribers without new data, e.g. after a local history
    /// append or so freshness classes advance.
    pub async fn refresh(&self) {
        self.notify().await;
    }

    // ========================================================================
    // SUBSCRIPTIONS AND FEEDS
    // ========================================================================

    /// Call `callback` with the merged view on every update.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LatestByEntity) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(callback));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    /// Consume a remote feed in the background. Returns `false` once
    /// disposed.
    pub fn attach(self: &Arc<Self>, feed: RemoteFeed) -> bool {
        if self.is_disposed() {
            return false;
        }
        debug!(kind = feed.kind(), "attaching remote feed");
        let handle = tokio::spawn(run_feed(Arc::downgrade(self), feed));
        lock(&self.tasks).push(handle);
        true
    }

    /// Re-notify subscribers every `interval`.
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> bool {
        if self.is_disposed() {
            return false;
        }
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(aggregator) = weak.upgrade() else { break };
                aggregator.refresh().await;
            }
        });
        lock(&self.tasks).push(handle);
        true
    }

    /// Stop every feed and refresh task and drop all subscribers.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
        lock(&self.listeners).entries.clear();
        info!("aggregator disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn notify(&self) {
        if self.is_disposed() {
            return;
        }
        let listeners: Vec<Listener> = lock(&self.listeners).entries.values().cloned().collect();
        if listeners.is_empty() {
            return;
        }
        let latest = self.get_latest().await;
        for listener in listeners {
            listener(&latest);
        }
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("thresholds", &self.thresholds)
            .field("history_limit", &self.history_limit)
            .field("subscribers", &self.subscriber_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

async fn run_feed(aggregator: Weak<Aggregator>, feed: RemoteFeed) {
    match feed {
        RemoteFeed::Push(mut snapshots) => {
            while let Some(snapshot) = snapshots.recv().await {
                let Some(aggregator) = aggregator.upgrade() else { return };
                aggregator.apply_snapshot(snapshot).await;
            }
            debug!("push feed closed");
        }
        RemoteFeed::Poll { fetcher, interval } => {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(aggregator) = aggregator.upgrade() else { return };
                match fetcher.fetch_latest().await {
                    Ok(snapshot) => aggregator.apply_snapshot(snapshot).await,
                    Err(e) => warn!(error = %e, "remote poll failed, keeping last snapshot"),
                }
            }
        }
        RemoteFeed::Stream(mut samples) => {
            while let Some((entity_id, sample)) = samples.recv().await {
                let Some(aggregator) = aggregator.upgrade() else { return };
                aggregator.apply_sample(entity_id, sample).await;
            }
            debug!("sample stream closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chrono::Duration as ChronoDuration;
    use tokio::sync::mpsc;
    use waypost_test_utils::assertions::{assert_cached, assert_live};
    use waypost_test_utils::fixtures::{base_time, memory_adapter, sample, sample_aged};
    use waypost_test_utils::MockLatestFetcher;

    async fn aggregator_with_history(samples: &[LocationSample]) -> Arc<Aggregator> {
        let history = Arc::new(HistoryStore::new(memory_adapter()));
        for s in samples {
            history.append(s.clone()).await.expect("valid sample");
        }
        Arc::new(Aggregator::new(history))
    }

    fn snapshot(samples: &[LocationSample]) -> LatestByEntity {
        samples
            .iter()
            .map(|s| (s.entity_id.clone(), s.clone()))
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn test_remote_wins_local_fills_gaps() {
        let agg = aggregator_with_history(&[
            sample("A", -6.25, 106.0),
            sample("B", -7.0, 110.0),
        ])
        .await;
        agg.apply_snapshot(snapshot(&[sample("A", -6.5, 106.5)])).await;

        let latest = agg.get_latest().await;
        assert_eq!(latest.len(), 2);
        assert_live(&latest, "A");
        assert_eq!(latest["A"].lat, -6.5);
        assert_cached(&latest, "B");
    }

    #[tokio::test]
    async fn test_without_feed_everything_is_cached() {
        let agg = aggregator_with_history(&[sample("A", 1.0, 2.0)]).await;
        let latest = agg.get_latest().await;
        assert_cached(&latest, "A");
    }

    #[tokio::test]
    async fn test_snapshot_replaces_whole_remote_view() {
        let agg = aggregator_with_history(&[sample("C", 3.0, 4.0)]).await;
        agg.apply_snapshot(snapshot(&[sample("A", 1.0, 1.0), sample("C", 5.0, 5.0)]))
            .await;
        agg.apply_snapshot(snapshot(&[sample("A", 2.0, 2.0)])).await;

        let latest = agg.get_latest().await;
        assert_eq!(latest["A"].lat, 2.0);
        // C fell out of the remote view and reverts to local history.
        assert_cached(&latest, "C");
        assert_eq!(latest["C"].lat, 3.0);
    }

    #[tokio::test]
    async fn test_stream_overrides_one_entity() {
        let agg = aggregator_with_history(&[]).await;
        agg.apply_snapshot(snapshot(&[sample("A", 1.0, 1.0), sample("B", 2.0, 2.0)]))
            .await;
        agg.apply_sample("B".to_string(), sample("B", 9.0, 9.0)).await;

        let latest = agg.get_latest().await;
        assert_eq!(latest["A"].lat, 1.0);
        assert_eq!(latest["B"].lat, 9.0);
        assert_live(&latest, "B");
    }

    #[tokio::test]
    async fn test_subscribers_notified_until_dropped() {
        let agg = aggregator_with_history(&[]).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = agg.subscribe(move |latest| {
            sink.lock().expect("lock").push(latest.len());
        });

        agg.apply_snapshot(snapshot(&[sample("A", 1.0, 1.0)])).await;
        agg.apply_sample("B".to_string(), sample("B", 1.0, 1.0)).await;
        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);

        subscription.unsubscribe();
        assert_eq!(agg.subscriber_count(), 0);
        agg.apply_snapshot(LatestByEntity::new()).await;
        assert_eq!(seen.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn test_push_feed_updates_in_background() {
        let agg = aggregator_with_history(&[]).await;
        let (tx, rx) = mpsc::channel(4);
        assert!(agg.attach(RemoteFeed::Push(rx)));

        tx.send(snapshot(&[sample("A", 1.0, 1.0)]))
            .await
            .expect("feed open");
        settle().await;
        assert_live(&agg.get_latest().await, "A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_keeps_previous_snapshot() {
        let agg = aggregator_with_history(&[]).await;
        let fetcher = Arc::new(MockLatestFetcher::new(snapshot(&[sample("A", 1.0, 1.0)])));
        agg.attach(RemoteFeed::Poll {
            fetcher: fetcher.clone(),
            interval: Duration::from_secs(10),
        });
        settle().await;
        assert_live(&agg.get_latest().await, "A");

        fetcher.set_failing(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fetcher.calls(), 2);
        assert_live(&agg.get_latest().await, "A");

        fetcher.set_failing(false);
        fetcher.set_snapshot(snapshot(&[sample("B", 2.0, 2.0)]));
        tokio::time::sleep(Duration::from_secs(10)).await;
        let latest = agg.get_latest().await;
        assert!(!latest.contains_key("A"));
        assert_live(&latest, "B");
    }

    #[tokio::test]
    async fn test_status_rows_classify_at_boundaries() {
        let now = base_time();
        let mut idle = sample_aged("IDLE", now, 10);
        idle.captured_at -= ChronoDuration::milliseconds(600);
        let agg = aggregator_with_history(&[
            sample_aged("ACTIVE", now, 10),
            idle,
            sample_aged("STALE", now, 61),
        ])
        .await;

        let rows = agg.status_rows(now).await;
        let by_id: BTreeMap<&str, &StatusRow> =
            rows.iter().map(|r| (r.entity_id.as_str(), r)).collect();
        assert_eq!(by_id["ACTIVE"].status, ActivityStatus::Active);
        assert_eq!(by_id["ACTIVE"].minutes_ago, 10.0);
        assert_eq!(by_id["IDLE"].status, ActivityStatus::Idle);
        assert_eq!(by_id["STALE"].status, ActivityStatus::Stale);
        assert!(rows.iter().all(|r| r.source == Provenance::Cached));

        // Recomputed per call.
        let later = agg.status_rows(now + ChronoDuration::hours(2)).await;
        assert!(later.iter().all(|r| r.status == ActivityStatus::Stale));
    }

    #[tokio::test]
    async fn test_history_view_newest_first() {
        let now = base_time();
        let samples: Vec<LocationSample> =
            (0..20).rev().map(|m| sample_aged("A", now, m)).collect();
        let agg = aggregator_with_history(&samples).await;

        let view = agg.recent_history("A").await;
        assert_eq!(view.total, 20);
        assert_eq!(view.samples.len(), DEFAULT_HISTORY_VIEW_LIMIT);
        assert_eq!(view.samples[0].captured_at, now);
        assert_eq!(agg.history_view("A", 3).await.samples.len(), 3);
    }

    #[tokio::test]
    async fn test_export_prefers_remote_view() {
        let agg = aggregator_with_history(&[sample("A", 1.0, 1.0)]).await;

        let doc = agg.export_at(base_time()).await.expect("export");
        assert_eq!(doc.filename, "waypost-latest-2026-03-02.json");
        assert_eq!(doc.source, ExportSource::History);
        let parsed: serde_json::Value = serde_json::from_str(&doc.contents).expect("json");
        assert!(parsed["A"].is_array());

        agg.apply_snapshot(snapshot(&[sample("B", 2.0, 2.0)])).await;
        let doc = agg.export_at(base_time()).await.expect("export");
        assert_eq!(doc.source, ExportSource::Latest);
        assert_eq!(doc.entities, 1);
        assert!(doc.contents.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&doc.contents).expect("json");
        assert_eq!(parsed["B"]["source"], "live");
        assert!(parsed.get("A").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_renotifies() {
        let agg = aggregator_with_history(&[sample("A", 1.0, 1.0)]).await;
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _subscription = agg.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        agg.spawn_refresh(DEFAULT_REFRESH_INTERVAL);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_stops_feeds_and_subscribers() {
        let agg = aggregator_with_history(&[]).await;
        let fetcher = Arc::new(MockLatestFetcher::default());
        agg.attach(RemoteFeed::Poll {
            fetcher: fetcher.clone(),
            interval: Duration::from_secs(5),
        });
        let _subscription = agg.subscribe(|_| {});
        settle().await;
        assert_eq!(fetcher.calls(), 1);

        agg.dispose();
        assert!(agg.is_disposed());
        assert_eq!(agg.subscriber_count(), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetcher.calls(), 1);
        assert!(!agg.attach(RemoteFeed::poll(fetcher)));
    }
}
