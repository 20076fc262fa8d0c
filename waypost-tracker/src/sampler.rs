//! The location sampler.
//!
//! `Stopped -> Running -> Stopped`. While running, one driver task owns the
//! periodic timer and listens to the [`SignalBus`]:
//!
//! - focus and visibility signals move between [`SamplingTier`]s; the timer
//!   is rebuilt with the new tier's interval only when the tier changes
//! - interaction signals sample with a fixed probability per event
//! - teardown always samples
//!
//! Every sample runs in its own task, so stopping the sampler (which aborts
//! the driver) never cancels a read already in flight.

use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use waypost_core::{
    AcquireOptions, AcquisitionError, EntityId, EnvironmentSignal, LocationSample,
    SamplerConfig, SignalBus, ValidationError,
};
use waypost_storage::{HistoryStore, RemoveOutcome, WriteOutcome};
use waypost_sync::{DeliveryOutcome, SyncingWriter};

use crate::source::SampleSource;
use crate::tier::{SamplingTier, TierIntervals};

pub const ACTIVE_MARKER_PREFIX: &str = "stealth_";
pub const ACTIVE_MARKER_VALUE: &str = "active";
pub const DEFAULT_OPPORTUNISTIC_PROBABILITY: f64 = 0.3;

/// Storage key of the per-entity "sampling active" marker.
pub fn active_marker_key(entity_id: &str) -> String {
    format!("{ACTIVE_MARKER_PREFIX}{entity_id}")
}

// ============================================================================
// OPTIONS AND OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOptions {
    pub acquire: AcquireOptions,
    pub intervals: TierIntervals,
    /// Chance in `[0, 1]` that one interaction event triggers a sample.
    pub opportunistic_probability: f64,
    /// Wait before the first sample and before the timer starts. Zero by
    /// default, so `start` samples immediately.
    pub start_delay: Duration,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            acquire: AcquireOptions::default(),
            intervals: TierIntervals::default(),
            opportunistic_probability: DEFAULT_OPPORTUNISTIC_PROBABILITY,
            start_delay: Duration::ZERO,
        }
    }
}

impl SamplerOptions {
    pub fn from_config(config: &SamplerConfig) -> Result<Self, ValidationError> {
        Ok(Self {
            acquire: config.acquire_options(),
            intervals: TierIntervals::from_config(config)?,
            opportunistic_probability: sanitize_probability(config.opportunistic_probability),
            start_delay: Duration::from_millis(config.start_delay_ms),
        })
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_intervals(mut self, intervals: TierIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_opportunistic_probability(mut self, probability: f64) -> Self {
        self.opportunistic_probability = sanitize_probability(probability);
        self
    }

    pub fn with_acquire(mut self, acquire: AcquireOptions) -> Self {
        self.acquire = acquire;
        self
    }
}

/// Clamp into `[0, 1]`; non-finite values disable the behaviour.
fn sanitize_probability(probability: f64) -> f64 {
    if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Result of one sampling attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Recorded {
        sample: LocationSample,
        history: WriteOutcome,
        delivery: DeliveryOutcome,
    },
    /// Acquisition failed; nothing was written.
    Skipped { error: AcquisitionError },
    NotRunning,
}

impl TickOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, TickOutcome::Recorded { .. })
    }
}

#[derive(Debug, Clone, Copy)]
enum TickTrigger {
    Start,
    Timer,
    Interaction,
    Teardown,
}

impl TickTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            TickTrigger::Start => "start",
            TickTrigger::Timer => "timer",
            TickTrigger::Interaction => "interaction",
            TickTrigger::Teardown => "teardown",
        }
    }
}

// ============================================================================
// SAMPLER
// ============================================================================

struct Session {
    entity_id: EntityId,
    options: SamplerOptions,
    driver: JoinHandle<()>,
}

pub struct LocationSampler {
    source: SampleSource,
    history: Arc<HistoryStore>,
    writer: Arc<SyncingWriter>,
    signals: Arc<SignalBus>,
    session: Mutex<Option<Session>>,
    tier: watch::Sender<SamplingTier>,
}

impl LocationSampler {
    /// Listens on the signal bus of the writer's queue.
    pub fn new(source: SampleSource, history: Arc<HistoryStore>, writer: Arc<SyncingWriter>) -> Self {
        let signals = Arc::clone(writer.queue().signals());
        let (tier, _) = watch::channel(SamplingTier::Active);
        Self {
            source,
            history,
            writer,
            signals,
            session: Mutex::new(None),
            tier,
        }
    }

    /// Start sampling for `entity_id`. Returns `false` if already running.
    pub async fn start(
        self: &Arc<Self>,
        entity_id: impl Into<EntityId>,
        options: SamplerOptions,
    ) -> bool {
        let entity_id = entity_id.into();
        let mut session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            debug!(entity_id = %current.entity_id, "sampler already running");
            return false;
        }

        self.tier.send_replace(SamplingTier::Active);
        let driver = tokio::spawn(run_driver(
            Arc::downgrade(self),
            options.clone(),
            self.signals.subscribe(),
        ));
        *session = Some(Session {
            entity_id: entity_id.clone(),
            options,
            driver,
        });

        let marker = self
            .history
            .adapter()
            .write(&active_marker_key(&entity_id), ACTIVE_MARKER_VALUE)
            .await;
        if let WriteOutcome::Failed { error } = marker {
            warn!(entity_id = %entity_id, error = %error, "could not persist active marker");
        }
        info!(entity_id = %entity_id, "sampler started");
        true
    }

    /// Stop the periodic timer and signal handling. Returns `false` if not
    /// running. Queued deliveries and history are left alone.
    pub async fn stop(&self) -> bool {
        let mut session = self.session.lock().await;
        let Some(current) = session.take() else {
            return false;
        };
        current.driver.abort();

        let removed = self
            .history
            .adapter()
            .remove(&active_marker_key(&current.entity_id))
            .await;
        if let RemoveOutcome::Failed { error } = removed {
            warn!(entity_id = %current.entity_id, error = %error, "could not clear active marker");
        }
        info!(entity_id = %current.entity_id, "sampler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Whether a sampling session for `entity_id` was marked active, by this
    /// or an earlier process.
    pub async fn is_marked_active(&self, entity_id: &str) -> bool {
        self.history
            .adapter()
            .read::<String>(&active_marker_key(entity_id))
            .await
            .is_some_and(|v| v == ACTIVE_MARKER_VALUE)
    }

    pub fn current_tier(&self) -> SamplingTier {
        *self.tier.borrow()
    }

    pub fn tier_changes(&self) -> watch::Receiver<SamplingTier> {
        self.tier.subscribe()
    }

    /// Interval of the current tier, `None` while stopped.
    pub async fn current_interval(&self) -> Option<Duration> {
        let session = self.session.lock().await;
        session
            .as_ref()
            .map(|s| s.options.intervals.interval(self.current_tier()))
    }

    /// Acquire one sample, append it to history and push it (or queue it).
    ///
    /// The history append and the push run concurrently.
    pub async fn sample_now(&self) -> TickOutcome {
        let (entity_id, acquire) = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(s) => (s.entity_id.clone(), s.options.acquire),
                None => return TickOutcome::NotRunning,
            }
        };

        let sample = match self.source.acquire_with(&entity_id, &acquire).await {
            Ok(sample) => sample,
            Err(error) => {
                warn!(entity_id = %entity_id, error = %error, "acquisition failed, skipping tick");
                return TickOutcome::Skipped { error };
            }
        };

        let (history, delivery) = tokio::join!(
            self.history.append(sample.clone()),
            self.writer.save_sample(&sample)
        );
        let history = match history {
            Ok(outcome) => outcome,
            Err(e) => return TickOutcome::Skipped { error: e.into() },
        };
        debug!(
            entity_id = %entity_id,
            stored = history.is_ok(),
            delivered = delivery.is_delivered(),
            "sample recorded"
        );
        TickOutcome::Recorded {
            sample,
            history,
            delivery,
        }
    }

    fn spawn_tick(self: &Arc<Self>, trigger: TickTrigger) {
        let sampler = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = sampler.sample_now().await;
            debug!(
                trigger = trigger.as_str(),
                recorded = outcome.is_recorded(),
                "tick finished"
            );
        });
    }

    fn on_signal(
        self: &Arc<Self>,
        signal: EnvironmentSignal,
        options: &SamplerOptions,
        ticker: &mut Option<Interval>,
    ) {
        if let Some(tier) = SamplingTier::from_signal(signal) {
            let changed = self.tier.send_if_modified(|current| {
                if *current == tier {
                    return false;
                }
                *current = tier;
                true
            });
            if changed {
                let interval = options.intervals.interval(tier);
                info!(tier = %tier, interval_ms = interval.as_millis() as u64, "sampling tier changed");
                if ticker.is_some() {
                    *ticker = Some(periodic(interval));
                }
            }
            return;
        }

        // Opportunistic sampling starts with the timer.
        if ticker.is_none() {
            return;
        }
        match signal {
            EnvironmentSignal::Interaction(kind) => {
                let chance = sanitize_probability(options.opportunistic_probability);
                if rand::rng().random_bool(chance) {
                    debug!(?kind, "opportunistic sample");
                    self.spawn_tick(TickTrigger::Interaction);
                }
            }
            EnvironmentSignal::Teardown => self.spawn_tick(TickTrigger::Teardown),
            _ => {}
        }
    }
}

impl Drop for LocationSampler {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.driver.abort();
        }
    }
}

impl std::fmt::Debug for LocationSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationSampler")
            .field("tier", &self.current_tier())
            .finish()
    }
}

// ============================================================================
// DRIVER
// ============================================================================

fn periodic(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_driver(
    sampler: Weak<LocationSampler>,
    options: SamplerOptions,
    mut signals: broadcast::Receiver<EnvironmentSignal>,
) {
    let delay = tokio::time::sleep(options.start_delay);
    tokio::pin!(delay);
    let mut ticker: Option<Interval> = None;
    let mut signals_open = true;

    loop {
        tokio::select! {
            _ = &mut delay, if ticker.is_none() => {
                let Some(sampler) = sampler.upgrade() else { break };
                sampler.spawn_tick(TickTrigger::Start);
                ticker = Some(periodic(options.intervals.interval(sampler.current_tier())));
            }
            _ = next_tick(&mut ticker) => {
                let Some(sampler) = sampler.upgrade() else { break };
                sampler.spawn_tick(TickTrigger::Timer);
            }
            received = signals.recv(), if signals_open => match received {
                Ok(signal) => {
                    let Some(sampler) = sampler.upgrade() else { break };
                    sampler.on_signal(signal, &options, &mut ticker);
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "sampler lagged behind signals"),
                Err(RecvError::Closed) => signals_open = false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_core::InteractionKind;
    use waypost_test_utils::fixtures::{sync_stack, SyncStack};
    use waypost_test_utils::MockLocationProvider;

    struct Rig {
        sampler: Arc<LocationSampler>,
        provider: Arc<MockLocationProvider>,
        history: Arc<HistoryStore>,
        stack: SyncStack,
    }

    fn rig(online: bool) -> Rig {
        let stack = sync_stack(online);
        let provider = Arc::new(MockLocationProvider::at(-6.25, 106.75, 50.0));
        let history = Arc::new(HistoryStore::new(stack.adapter.clone()));
        let sampler = Arc::new(LocationSampler::new(
            SampleSource::new(provider.clone()),
            history.clone(),
            stack.writer.clone(),
        ));
        Rig {
            sampler,
            provider,
            history,
            stack,
        }
    }

    fn no_delay() -> SamplerOptions {
        SamplerOptions::default().with_start_delay(Duration::ZERO)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_double_start_ticks_once_per_interval() {
        let rig = rig(true);
        assert!(rig.sampler.start("E1", no_delay()).await);
        assert!(!rig.sampler.start("E1", no_delay()).await);
        settle().await;
        assert_eq!(rig.provider.calls(), 1);

        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(rig.provider.calls(), 2);
        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(rig.provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_delay_postpones_first_sample() {
        let rig = rig(true);
        let delayed = SamplerOptions::default().with_start_delay(Duration::from_secs(30));
        assert!(rig.sampler.start("E1", delayed.clone()).await);
        settle().await;
        assert!(rig.sampler.is_running().await);
        assert_eq!(rig.provider.calls(), 0);
        assert!(!rig.sampler.start("E1", delayed).await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rig.provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_change_rebuilds_timer() {
        let rig = rig(true);
        rig.sampler.start("E1", no_delay()).await;
        settle().await;

        rig.stack.signals.emit(EnvironmentSignal::FocusLost);
        settle().await;
        assert_eq!(rig.sampler.current_tier(), SamplingTier::Backgrounded);
        assert_eq!(rig.sampler.current_interval().await, Some(10 * MINUTE));

        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(rig.provider.calls(), 1);
        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(rig.provider.calls(), 2);

        rig.stack.signals.emit(EnvironmentSignal::Hidden);
        settle().await;
        assert_eq!(rig.sampler.current_interval().await, Some(15 * MINUTE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_tier_signal_keeps_timer() {
        let rig = rig(true);
        rig.sampler.start("E1", no_delay()).await;
        settle().await;

        tokio::time::sleep(4 * MINUTE).await;
        rig.stack.signals.emit(EnvironmentSignal::Visible);
        tokio::time::sleep(MINUTE).await;
        assert_eq!(rig.provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_sampling_follows_probability() {
        let always = rig(true);
        always
            .sampler
            .start("E1", no_delay().with_opportunistic_probability(1.0))
            .await;
        settle().await;
        always
            .stack
            .signals
            .emit(EnvironmentSignal::Interaction(InteractionKind::Click));
        settle().await;
        assert_eq!(always.provider.calls(), 2);

        let never = rig(true);
        never
            .sampler
            .start("E2", no_delay().with_opportunistic_probability(0.0))
            .await;
        settle().await;
        never
            .stack
            .signals
            .emit(EnvironmentSignal::Interaction(InteractionKind::KeyDown));
        settle().await;
        assert_eq!(never.provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_always_samples() {
        let rig = rig(true);
        rig.sampler
            .start("E1", no_delay().with_opportunistic_probability(0.0))
            .await;
        settle().await;
        rig.stack.signals.emit(EnvironmentSignal::Teardown);
        settle().await;
        assert_eq!(rig.provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_appends_history_and_pushes() {
        let rig = rig(true);
        rig.sampler.start("E1", no_delay()).await;
        settle().await;

        let outcome = rig.sampler.sample_now().await;
        match outcome {
            TickOutcome::Recorded {
                history, delivery, ..
            } => {
                assert!(history.is_ok());
                assert!(delivery.is_delivered());
            }
            other => panic!("expected recorded, got {:?}", other),
        }
        assert_eq!(rig.history.load().await["E1"].len(), 2);
        assert_eq!(rig.stack.remote.accepted_samples().len(), 2);
        assert!(rig.stack.queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_failure_queues_sample() {
        let rig = rig(true);
        rig.stack.remote.set_down(true);
        rig.sampler.start("E1", no_delay()).await;
        settle().await;

        let tasks = rig.stack.queue.inspect().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].action, waypost_core::SyncAction::PushSample);
        assert_eq!(rig.history.load().await["E1"].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_failure_skips_tick() {
        let rig = rig(true);
        rig.provider.set_error(AcquisitionError::Unavailable {
            reason: "no signal".to_string(),
        });
        rig.sampler.start("E1", no_delay()).await;
        settle().await;

        assert!(matches!(
            rig.sampler.sample_now().await,
            TickOutcome::Skipped { .. }
        ));
        assert!(rig.history.load().await.is_empty());
        assert_eq!(rig.stack.remote.call_count(), 0);
        assert!(rig.stack.queue.is_empty().await);

        // Next scheduled tick still happens.
        tokio::time::sleep(5 * MINUTE).await;
        assert_eq!(rig.provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timer_keeps_data() {
        let rig = rig(false);
        rig.sampler.start("E1", no_delay()).await;
        settle().await;
        assert!(rig.sampler.stop().await);
        assert!(!rig.sampler.stop().await);

        tokio::time::sleep(20 * MINUTE).await;
        assert_eq!(rig.provider.calls(), 1);
        assert_eq!(rig.history.load().await["E1"].len(), 1);
        assert_eq!(rig.stack.queue.len().await, 1);
        assert_eq!(rig.sampler.current_interval().await, None);
        assert_eq!(rig.sampler.sample_now().await, TickOutcome::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_cancel_in_flight_read() {
        let rig = rig(true);
        rig.provider.set_delay(Duration::from_secs(5));
        rig.sampler.start("E1", no_delay()).await;
        settle().await;
        rig.sampler.stop().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rig.history.load().await["E1"].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_marker_follows_session() {
        let rig = rig(true);
        assert!(!rig.sampler.is_marked_active("E1").await);
        rig.sampler.start("E1", SamplerOptions::default()).await;
        assert!(rig.sampler.is_marked_active("E1").await);
        assert_eq!(
            rig.stack
                .adapter
                .read::<String>(&active_marker_key("E1"))
                .await
                .as_deref(),
            Some("active")
        );
        rig.sampler.stop().await;
        assert!(!rig.sampler.is_marked_active("E1").await);
    }

    #[test]
    fn test_options_from_config() {
        let options = SamplerOptions::from_config(&SamplerConfig::default())
            .expect("defaults are valid");
        assert_eq!(options.start_delay, Duration::from_secs(30));
        assert_eq!(
            options.with_start_delay(Duration::ZERO),
            SamplerOptions::default()
        );

        let clamped = SamplerOptions::default().with_opportunistic_probability(4.0);
        assert_eq!(clamped.opportunistic_probability, 1.0);

        let config = SamplerConfig {
            opportunistic_probability: f64::NAN,
            ..SamplerConfig::default()
        };
        let options = SamplerOptions::from_config(&config).expect("intervals are valid");
        assert_eq!(options.opportunistic_probability, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_options_sample_immediately() {
        let rig = rig(true);
        assert!(rig.sampler.start("E1", SamplerOptions::default()).await);
        settle().await;
        assert_eq!(rig.provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_finite_probability_keeps_timer_alive() {
        let rig = rig(true);
        let mut options = no_delay();
        options.opportunistic_probability = f64::NAN;
        rig.sampler.start("E1", options).await;
        settle().await;

        rig.stack
            .signals
            .emit(EnvironmentSignal::Interaction(InteractionKind::Click));
        settle().await;
        assert_eq!(rig.provider.calls(), 1);

        tokio::time::sleep(20 * MINUTE).await;
        assert_eq!(rig.provider.calls(), 5);
        assert!(rig.sampler.is_running().await);
    }
}
