//! Durable, ordered outbox of remote writes.
//!
//! Tasks are delivered strictly in enqueue order. The first failure halts the
//! pass, so a later task never overtakes an older one (head-of-line
//! blocking). The whole task list is one persisted value; every change is a
//! read-modify-write under one async lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waypost_core::{
    AuditEvent, DeliveryError, EnvironmentSignal, LocationSample, RemoteWriter, SignalBus,
    SyncAction, SyncTask, ValidationError,
};
use waypost_storage::{PersistenceAdapter, WriteOutcome};

pub const DEFAULT_QUEUE_KEY: &str = "waypost:sync-queue:v1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Result of [`DeliveryQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOutcome {
    pub task: SyncTask,
    /// Whether the updated queue reached storage. The task stays queued in
    /// memory either way.
    pub write: WriteOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushSkip {
    Offline,
    AlreadyFlushing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushStatus {
    /// Every task present at the start of the pass was handled.
    Drained,
    /// A task failed; it and everything after it stay queued.
    Halted { task_id: Uuid, error: DeliveryError },
    Skipped(FlushSkip),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub status: FlushStatus,
    pub delivered: usize,
    /// Tasks dropped because this build cannot deliver their action.
    pub dropped: usize,
    pub remaining: usize,
}

impl FlushReport {
    fn skipped(reason: FlushSkip) -> Self {
        Self {
            status: FlushStatus::Skipped(reason),
            delivered: 0,
            dropped: 0,
            remaining: 0,
        }
    }
}

enum Handled {
    Delivered,
    Dropped,
}

/// Resets the flush flag when a pass ends, however it ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct DeliveryQueue {
    adapter: Arc<PersistenceAdapter>,
    key: String,
    remote: Arc<dyn RemoteWriter>,
    signals: Arc<SignalBus>,
    flushing: AtomicBool,
    tasks: Mutex<Option<Vec<SyncTask>>>,
}

impl DeliveryQueue {
    pub fn new(
        adapter: Arc<PersistenceAdapter>,
        remote: Arc<dyn RemoteWriter>,
        signals: Arc<SignalBus>,
    ) -> Self {
        Self {
            adapter,
            key: DEFAULT_QUEUE_KEY.to_string(),
            remote,
            signals,
            flushing: AtomicBool::new(false),
            tasks: Mutex::new(None),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn remote(&self) -> &Arc<dyn RemoteWriter> {
        &self.remote
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    // ========================================================================
    // QUEUE STATE
    // ========================================================================

    /// Append a new task and persist the whole queue.
    ///
    /// A `pushSample` payload must decode to a valid sample; anything else
    /// is rejected before it can block the queue.
    pub async fn enqueue(
        &self,
        action: SyncAction,
        payload: serde_json::Value,
    ) -> Result<EnqueueOutcome, ValidationError> {
        check_payload(action, &payload)?;
        let task = SyncTask::new(action, payload);
        let mut guard = self.tasks.lock().await;
        let tasks = self.loaded(&mut guard).await;
        tasks.push(task.clone());
        let write = self.persist(tasks).await;
        debug!(task_id = %task.id, action = %action, queued = tasks.len(), "task enqueued");
        Ok(EnqueueOutcome { task, write })
    }

    /// Snapshot of the queue, oldest first.
    pub async fn inspect(&self) -> Vec<SyncTask> {
        let mut guard = self.tasks.lock().await;
        self.loaded(&mut guard).await.clone()
    }

    pub async fn len(&self) -> usize {
        let mut guard = self.tasks.lock().await;
        self.loaded(&mut guard).await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove one task without delivering it. Returns whether it was queued.
    pub async fn discard(&self, task_id: Uuid) -> bool {
        let removed = self.remove(task_id).await;
        if removed {
            info!(task_id = %task_id, "task discarded");
        }
        removed
    }

    async fn contains(&self, task_id: Uuid) -> bool {
        let mut guard = self.tasks.lock().await;
        self.loaded(&mut guard).await.iter().any(|t| t.id == task_id)
    }

    async fn remove(&self, task_id: Uuid) -> bool {
        let mut guard = self.tasks.lock().await;
        let tasks = self.loaded(&mut guard).await;
        let before = tasks.len();
        tasks.retain(|t| t.id != task_id);
        if tasks.len() == before {
            return false;
        }
        self.persist(tasks).await;
        true
    }

    async fn loaded<'a>(&self, cache: &'a mut Option<Vec<SyncTask>>) -> &'a mut Vec<SyncTask> {
        if cache.is_none() {
            let tasks = self
                .adapter
                .read::<Vec<SyncTask>>(&self.key)
                .await
                .unwrap_or_default();
            *cache = Some(tasks);
        }
        cache.get_or_insert_with(Vec::new)
    }

    async fn persist(&self, tasks: &[SyncTask]) -> WriteOutcome {
        let outcome = self.adapter.write(&self.key, tasks).await;
        if let WriteOutcome::Failed { error } = &outcome {
            warn!(key = %self.key, error = %error, "queue kept in memory only");
        }
        outcome
    }

    // ========================================================================
    // FLUSH
    // ========================================================================

    /// Deliver queued tasks in order, stopping at the first failure.
    ///
    /// No-op while offline or while another flush is running.
    pub async fn flush(&self) -> FlushReport {
        if !self.signals.is_online() {
            return FlushReport::skipped(FlushSkip::Offline);
        }
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return FlushReport::skipped(FlushSkip::AlreadyFlushing);
        }
        let _guard = FlushGuard(&self.flushing);

        let pending = self.inspect().await;
        let mut report = FlushReport {
            status: FlushStatus::Drained,
            delivered: 0,
            dropped: 0,
            remaining: 0,
        };

        for task in pending {
            // Discarded since the snapshot was taken.
            if !self.contains(task.id).await {
                continue;
            }
            match self.deliver(&task).await {
                Ok(handled) => {
                    self.remove(task.id).await;
                    match handled {
                        Handled::Delivered => report.delivered += 1,
                        Handled::Dropped => report.dropped += 1,
                    }
                }
                Err(error) => {
                    warn!(
                        task_id = %task.id,
                        action = %task.action,
                        error = %error,
                        "flush halted"
                    );
                    report.status = FlushStatus::Halted {
                        task_id: task.id,
                        error,
                    };
                    break;
                }
            }
        }

        report.remaining = self.len().await;
        if report.delivered > 0 || report.dropped > 0 {
            info!(
                delivered = report.delivered,
                dropped = report.dropped,
                remaining = report.remaining,
                "flush pass finished"
            );
        }
        report
    }

    async fn deliver(&self, task: &SyncTask) -> Result<Handled, DeliveryError> {
        match task.action {
            SyncAction::PushSample => {
                let sample: LocationSample = decode(task)?;
                self.remote.push_sample(&sample).await?;
            }
            SyncAction::PushSessionState => {
                self.remote.push_session_state(&task.payload).await?;
            }
            SyncAction::PushBulkState => {
                self.remote.push_bulk_state(&task.payload).await?;
            }
            SyncAction::PushAuditEvent => {
                let event: AuditEvent = decode(task)?;
                self.remote.push_audit_event(&event).await?;
            }
            SyncAction::Unknown => {
                warn!(task_id = %task.id, "dropping task with unknown action");
                return Ok(Handled::Dropped);
            }
        }
        Ok(Handled::Delivered)
    }

    // ========================================================================
    // TRIGGERS
    // ========================================================================

    /// Flush on a fixed poll, on connectivity regained and on becoming
    /// visible. Dropping the returned driver stops it.
    pub fn spawn_flush_driver(self: &Arc<Self>, poll_interval: Duration) -> FlushDriver {
        let queue = Arc::clone(self);
        let mut signals = Some(self.signals.subscribe());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                let signal = async {
                    match signals.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    _ = ticker.tick() => {}
                    received = signal => match received {
                        Ok(EnvironmentSignal::ConnectivityRegained | EnvironmentSignal::Visible) => {
                            debug!("flush triggered by signal");
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "signal receiver lagged");
                        }
                        Err(RecvError::Closed) => {
                            signals = None;
                            continue;
                        }
                    },
                }
                queue.flush().await;
            }
        });
        FlushDriver { handle }
    }
}

fn check_payload(action: SyncAction, payload: &serde_json::Value) -> Result<(), ValidationError> {
    if action != SyncAction::PushSample {
        return Ok(());
    }
    let sample = LocationSample::deserialize(payload).map_err(|e| ValidationError::InvalidValue {
        field: "payload".to_string(),
        reason: e.to_string(),
    })?;
    sample.validate()
}

fn decode<T: serde::de::DeserializeOwned>(task: &SyncTask) -> Result<T, DeliveryError> {
    serde_json::from_value(task.payload.clone()).map_err(|e| DeliveryError::MalformedPayload {
        action: task.action.to_string(),
        reason: e.to_string(),
    })
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("key", &self.key)
            .field("flushing", &self.is_flushing())
            .finish()
    }
}

/// Background flush triggers. Stops when dropped.
#[derive(Debug)]
pub struct FlushDriver {
    handle: JoinHandle<()>,
}

impl FlushDriver {
    pub fn shutdown(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for FlushDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// TESTS
// ============================================================================
