//! LMDB-backed secondary store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! transactional key/value file. Values are stored as JSON bytes under the
//! UTF-8 bytes of their key.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions:
//! - Read transactions for `get`
//! - Write transactions for `put` and `delete`

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use waypost_core::StorageError;

use super::traits::SecondaryStore;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        StorageError::Secondary {
            reason: e.to_string(),
        }
    }
}

pub struct LmdbSecondaryStore {
    env: Env,
    /// The single unnamed database.
    db: Database<Bytes, Bytes>,
}

impl LmdbSecondaryStore {
    /// Open (or create) the store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, LmdbStoreError> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for LmdbSecondaryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbSecondaryStore")
            .field("path", &self.env.path())
            .finish()
    }
}

#[async_trait]
impl SecondaryStore for LmdbSecondaryStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| LmdbStoreError::Serialization(e.to_string()))?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => {
                let value = serde_json::from_slice(bytes)
                    .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LmdbStoreError::Transaction(e.to_string()).into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}
