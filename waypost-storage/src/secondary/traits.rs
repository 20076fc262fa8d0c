//! Secondary store trait.

use async_trait::async_trait;
use waypost_core::StorageError;

/// Embedded store with effectively unbounded capacity.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait SecondaryStore: Send + Sync {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    /// Returns whether a value was present.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}
