//! Local, bounded audit trail.
//!
//! Newest entries first; the oldest fall off once `max_entries` is reached.
//! Persisted as one value through the [`PersistenceAdapter`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use waypost_core::{AuditEvent, AuditSink, WaypostResult};

use crate::adapter::{PersistenceAdapter, WriteOutcome};

pub const DEFAULT_AUDIT_KEY: &str = "audit_logs";
pub const DEFAULT_MAX_AUDIT_ENTRIES: usize = 1000;

/// Filter for [`LocalAuditLog::entries`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub user: Option<String>,
    pub action: Option<String>,
    /// Calendar day (UTC) of the event.
    pub day: Option<NaiveDate>,
}

impl AuditFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.user.as_deref().map_or(true, |u| event.user == u)
            && self.action.as_deref().map_or(true, |a| event.action == a)
            && self
                .day
                .map_or(true, |d| event.timestamp.date_naive() == d)
    }
}

pub struct LocalAuditLog {
    adapter: Arc<PersistenceAdapter>,
    key: String,
    max_entries: usize,
    cache: Mutex<Option<Vec<AuditEvent>>>,
}

impl LocalAuditLog {
    pub fn new(adapter: Arc<PersistenceAdapter>) -> Self {
        Self {
            adapter,
            key: DEFAULT_AUDIT_KEY.to_string(),
            max_entries: DEFAULT_MAX_AUDIT_ENTRIES,
            cache: Mutex::new(None),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub async fn append(&self, event: AuditEvent) -> WriteOutcome {
        self.modify(|events| {
            events.insert(0, event);
            events.truncate(self.max_entries);
        })
        .await
    }

    pub async fn entries(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let mut cache = self.cache.lock().await;
        let events = self.loaded(&mut cache).await;
        events.iter().filter(|e| filter.matches(e)).cloned().collect()
    }

    /// Drop entries older than `days` days. Returns how many were removed.
    ///
    /// A span too large to represent prunes nothing.
    pub async fn prune_older_than(&self, days: i64) -> usize {
        let cutoff = match Duration::try_days(days)
            .and_then(|span| chrono::Utc::now().checked_sub_signed(span))
        {
            Some(cutoff) => cutoff,
            None => {
                debug!(days, "prune span out of range, nothing removed");
                return 0;
            }
        };
        let mut removed = 0;
        self.modify(|events| {
            let before = events.len();
            events.retain(|e| e.timestamp >= cutoff);
            removed = before - events.len();
        })
        .await;
        removed
    }

    async fn modify(&self, f: impl FnOnce(&mut Vec<AuditEvent>)) -> WriteOutcome {
        let mut cache = self.cache.lock().await;
        let events = self.loaded(&mut cache).await;
        f(events);
        let outcome = self.adapter.write(&self.key, &*events).await;
        if let WriteOutcome::Failed { error } = &outcome {
            warn!(key = %self.key, error = %error, "audit log kept in memory only");
        }
        outcome
    }

    async fn loaded<'a>(&self, cache: &'a mut Option<Vec<AuditEvent>>) -> &'a mut Vec<AuditEvent> {
        if cache.is_none() {
            let events = self
                .adapter
                .read::<Vec<AuditEvent>>(&self.key)
                .await
                .unwrap_or_default();
            *cache = Some(events);
        }
        cache.get_or_insert_with(Vec::new)
    }
}

#[async_trait]
impl AuditSink for LocalAuditLog {
    async fn record(&self, event: AuditEvent) -> WaypostResult<()> {
        match self.append(event).await {
            WriteOutcome::Stored { .. } => Ok(()),
            WriteOutcome::Failed { error } => Err(error.into()),
        }
    }
}
