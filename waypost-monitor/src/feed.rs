//! Remote "latest per entity" feeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use waypost_core::{EntityId, LatestByEntity, LatestFetcher, LocationSample};

/// Default poll period for pull-based feeds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A source of remote updates for the [`Aggregator`](crate::Aggregator).
///
/// Snapshot feeds (`Push`, `Poll`) replace the whole remote view on every
/// update. `Stream` overrides one entity at a time. A poll feed only sees
/// changes once per interval, so remote updates can lag by up to that long.
pub enum RemoteFeed {
    Push(mpsc::Receiver<LatestByEntity>),
    Poll {
        fetcher: Arc<dyn LatestFetcher>,
        interval: Duration,
    },
    Stream(mpsc::Receiver<(EntityId, LocationSample)>),
}

impl RemoteFeed {
    pub fn poll(fetcher: Arc<dyn LatestFetcher>) -> Self {
        RemoteFeed::Poll {
            fetcher,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteFeed::Push(_) => "push",
            RemoteFeed::Poll { .. } => "poll",
            RemoteFeed::Stream(_) => "stream",
        }
    }
}

impl std::fmt::Debug for RemoteFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteFeed::Poll { interval, .. } => f
                .debug_struct("RemoteFeed::Poll")
                .field("interval", interval)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}
