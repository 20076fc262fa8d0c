//! WAYPOST Monitor - The observing side of the pipeline
//!
//! Merges the remote authority's latest-per-entity view with locally
//! persisted history, notifies subscribers on every change, renders
//! freshness rows and exports the current view as JSON.

pub mod aggregator;
pub mod feed;

pub use aggregator::{
    export_filename, merge_latest, Aggregator, ExportDocument, ExportSource, StatusRow,
    Subscription, DEFAULT_HISTORY_VIEW_LIMIT, DEFAULT_REFRESH_INTERVAL,
};
pub use feed::{RemoteFeed, DEFAULT_POLL_INTERVAL};
