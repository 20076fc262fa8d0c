//! Environment signals shared by the sampler and the delivery queue.
//!
//! The host pushes focus, visibility, connectivity, interaction and teardown
//! events into a [`SignalBus`]; components subscribe independently. The bus
//! also holds the current "online" flag so components can check connectivity
//! without waiting for an event.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default broadcast capacity. Slow subscribers skip lagged signals.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// User interactions that may trigger an opportunistic sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Click,
    Touch,
    Scroll,
    PointerMove,
    KeyDown,
    Submit,
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentSignal {
    FocusGained,
    FocusLost,
    Visible,
    Hidden,
    ConnectivityRegained,
    ConnectivityLost,
    Interaction(InteractionKind),
    Teardown,
}

pub struct SignalBus {
    sender: broadcast::Sender<EnvironmentSignal>,
    online: AtomicBool,
}

impl SignalBus {
    pub fn new(online: bool) -> Self {
        Self::with_capacity(online, DEFAULT_SIGNAL_CAPACITY)
    }

    pub fn with_capacity(online: bool, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            online: AtomicBool::new(online),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnvironmentSignal> {
        self.sender.subscribe()
    }

    /// Publish a signal. Connectivity signals also update the online flag.
    pub fn emit(&self, signal: EnvironmentSignal) {
        match signal {
            EnvironmentSignal::ConnectivityRegained => self.online.store(true, Ordering::SeqCst),
            EnvironmentSignal::ConnectivityLost => self.online.store(false, Ordering::SeqCst),
            _ => {}
        }
        // No subscribers is not an error.
        let _ = self.sender.send(signal);
    }

    /// Update connectivity, emitting a signal only on an actual change.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            let signal = if online {
                EnvironmentSignal::ConnectivityRegained
            } else {
                EnvironmentSignal::ConnectivityLost
            };
            let _ = self.sender.send(signal);
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("online", &self.is_online())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_online_emits_only_on_change() {
        let bus = SignalBus::new(false);
        let mut rx = bus.subscribe();

        bus.set_online(false);
        bus.set_online(true);
        bus.set_online(true);

        assert_eq!(
            rx.recv().await.expect("signal should arrive"),
            EnvironmentSignal::ConnectivityRegained
        );
        assert!(rx.try_recv().is_err());
        assert!(bus.is_online());
    }

    #[tokio::test]
    async fn test_emit_connectivity_updates_flag() {
        let bus = SignalBus::new(true);
        bus.emit(EnvironmentSignal::ConnectivityLost);
        assert!(!bus.is_online());
        bus.emit(EnvironmentSignal::ConnectivityRegained);
        assert!(bus.is_online());
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = SignalBus::default();
        bus.emit(EnvironmentSignal::Teardown);
        assert!(bus.is_online());
    }
}
