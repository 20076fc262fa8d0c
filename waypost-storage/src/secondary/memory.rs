//! In-memory secondary store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use waypost_core::StorageError;

use super::traits::SecondaryStore;

#[derive(Debug, Default)]
pub struct InMemorySecondaryStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemorySecondaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl SecondaryStore for InMemorySecondaryStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.values.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemorySecondaryStore::new();
        store.put("k", &json!({"a": 1})).await.expect("put should succeed");
        assert_eq!(store.get("k").await.expect("get should succeed"), Some(json!({"a": 1})));
        assert!(store.delete("k").await.expect("delete should succeed"));
        assert!(!store.delete("k").await.expect("delete should succeed"));
        assert!(store.is_empty().await);
    }
}
