//! Bounded, quota-limited text store.
//!
//! Models a small synchronous key/value area (a browser-style local store, a
//! preferences file) that refuses writes once its byte budget is spent.
//! Replacing a key only needs room for the difference in size.

use std::collections::HashMap;
use std::sync::RwLock;

use waypost_core::StorageError;

/// Synchronous text store with a hard capacity.
pub trait QuotaStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Fails with [`StorageError::QuotaExceeded`] when the write does not fit.
    /// A failed write leaves any previous value untouched.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    fn usage(&self) -> QuotaUsage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaUsage {
    pub used_bytes: usize,
    pub quota_bytes: usize,
    pub entries: usize,
}

impl QuotaUsage {
    pub fn available(&self) -> usize {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<String, String>,
    used: usize,
}

/// In-process [`QuotaStore`] counting UTF-8 bytes of keys and values.
#[derive(Debug)]
pub struct MemoryQuotaStore {
    quota_bytes: usize,
    inner: RwLock<Inner>,
}

impl MemoryQuotaStore {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            quota_bytes,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self.inner.read() {
            Ok(inner) => inner.items.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

impl QuotaStore for MemoryQuotaStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let inner = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(inner.items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        let previous = inner
            .items
            .get(key)
            .map(|old| entry_size(key, old))
            .unwrap_or(0);
        let requested = entry_size(key, value);
        let used_without = inner.used - previous;
        if used_without + requested > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                requested,
                available: self.quota_bytes.saturating_sub(used_without),
            });
        }
        inner.items.insert(key.to_string(), value.to_string());
        inner.used = used_without + requested;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(old) = inner.items.remove(key) {
            inner.used -= entry_size(key, &old);
        }
        Ok(())
    }

    fn usage(&self) -> QuotaUsage {
        match self.inner.read() {
            Ok(inner) => QuotaUsage {
                used_bytes: inner.used,
                quota_bytes: self.quota_bytes,
                entries: inner.items.len(),
            },
            Err(_) => QuotaUsage {
                quota_bytes: self.quota_bytes,
                ..QuotaUsage::default()
            },
        }
    }
}
