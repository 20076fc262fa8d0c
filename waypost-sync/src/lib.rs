//! WAYPOST Sync - Offline-tolerant delivery to the remote authority
//!
//! Writes are attempted directly and, when that fails or connectivity is
//! absent, fall back to a durable ordered queue that is drained on a poll,
//! when connectivity returns and when the client becomes visible.

pub mod audit;
pub mod queue;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use audit::RemoteFirstAudit;
pub use queue::{
    DeliveryQueue, EnqueueOutcome, FlushDriver, FlushReport, FlushSkip, FlushStatus,
    DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_KEY,
};
pub use writer::{DeliveryOutcome, SyncingWriter};
