//! Degrading persistence adapter.
//!
//! A write tries, in order, until one strategy succeeds:
//!
//! 1. the serialized text, directly in the bounded store
//! 2. the text compressed with [`TextCodec`], plus a codec marker
//! 3. the compressed (or, if compression failed, raw) text split into
//!    fixed-size segments, plus a segment count
//! 4. the structured value in the [`SecondaryStore`]
//!
//! Every successful write removes whatever an earlier strategy left behind
//! for the same key, so exactly one representation is live at a time.
//!
//! Bounded-store layout for a key `k`:
//!
//! | key | content |
//! |---|---|
//! | `k` | direct or compressed text |
//! | `k__compressed` | codec marker |
//! | `k__chunks` | segment count |
//! | `k__chunk_{i}` | segment `i` |

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use waypost_core::StorageError;

use crate::codec::TextCodec;
use crate::quota::QuotaStore;
use crate::secondary::SecondaryStore;

/// Default segment length, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 8000;

const COMPRESSED_SUFFIX: &str = "__compressed";
const CHUNK_COUNT_SUFFIX: &str = "__chunks";

fn compressed_key(key: &str) -> String {
    format!("{key}{COMPRESSED_SUFFIX}")
}

fn chunk_count_key(key: &str) -> String {
    format!("{key}{CHUNK_COUNT_SUFFIX}")
}

fn chunk_key(key: &str, index: usize) -> String {
    format!("{key}__chunk_{index}")
}

/// Which strategy holds the current value of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMethod {
    Direct,
    Compressed,
    ChunkedCompressed,
    Chunked,
    Secondary,
}

impl StorageMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMethod::Direct => "direct",
            StorageMethod::Compressed => "direct+compressed",
            StorageMethod::ChunkedCompressed => "chunked+compressed",
            StorageMethod::Chunked => "chunked",
            StorageMethod::Secondary => "secondary",
        }
    }
}

/// Result of [`PersistenceAdapter::write`]. Never an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Stored { method: StorageMethod },
    Failed { error: StorageError },
}

impl WriteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, WriteOutcome::Stored { .. })
    }

    pub fn method(&self) -> Option<StorageMethod> {
        match self {
            WriteOutcome::Stored { method } => Some(*method),
            WriteOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&StorageError> {
        match self {
            WriteOutcome::Stored { .. } => None,
            WriteOutcome::Failed { error } => Some(error),
        }
    }
}

/// Result of [`PersistenceAdapter::remove`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed,
    Failed { error: StorageError },
}

impl RemoveOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RemoveOutcome::Removed)
    }
}

pub struct PersistenceAdapter {
    bounded: Arc<dyn QuotaStore>,
    secondary: Arc<dyn SecondaryStore>,
    codec: TextCodec,
    chunk_size: usize,
}

impl PersistenceAdapter {
    pub fn new(bounded: Arc<dyn QuotaStore>, secondary: Arc<dyn SecondaryStore>) -> Self {
        Self {
            bounded,
            secondary,
            codec: TextCodec::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Segment length for chunked writes. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_codec(mut self, codec: TextCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn bounded(&self) -> &Arc<dyn QuotaStore> {
        &self.bounded
    }

    pub fn secondary(&self) -> &Arc<dyn SecondaryStore> {
        &self.secondary
    }

    // ========================================================================
    // WRITE
    // ========================================================================

    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> WriteOutcome {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                return WriteOutcome::Failed {
                    error: StorageError::Serialization {
                        key: key.to_string(),
                        reason: e.to_string(),
                    },
                }
            }
        };
        let text = json.to_string();

        if let Some(method) = self.try_bounded(key, &text) {
            self.drop_secondary_copy(key).await;
            return WriteOutcome::Stored { method };
        }

        match self.secondary.put(key, &json).await {
            Ok(()) => {
                self.clear_bounded(key);
                debug!(key, method = StorageMethod::Secondary.as_str(), "stored value");
                WriteOutcome::Stored {
                    method: StorageMethod::Secondary,
                }
            }
            Err(e) => {
                warn!(key, error = %e, "all persistence strategies exhausted");
                WriteOutcome::Failed {
                    error: StorageError::Degraded {
                        key: key.to_string(),
                        reason: e.to_string(),
                    },
                }
            }
        }
    }

    /// Strategies 1 to 3. Returns the method that succeeded.
    fn try_bounded(&self, key: &str, text: &str) -> Option<StorageMethod> {
        match self.bounded.set_item(key, text) {
            Ok(()) => {
                self.remove_quietly(&compressed_key(key));
                self.clear_chunks(key);
                return Some(StorageMethod::Direct);
            }
            Err(e) => debug!(key, error = %e, "direct write failed"),
        }

        let compressed = match self.codec.compress(key, text) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(key, error = %e, "compression failed");
                None
            }
        };

        if let Some(packed) = &compressed {
            if self.write_compressed(key, packed) {
                self.clear_chunks(key);
                debug!(key, method = StorageMethod::Compressed.as_str(), "stored value");
                return Some(StorageMethod::Compressed);
            }
        }

        let (body, is_compressed) = match &compressed {
            Some(packed) => (packed.as_str(), true),
            None => (text, false),
        };
        if self.write_chunks(key, body, is_compressed) {
            let method = if is_compressed {
                StorageMethod::ChunkedCompressed
            } else {
                StorageMethod::Chunked
            };
            debug!(key, method = method.as_str(), "stored value");
            return Some(method);
        }

        None
    }

    fn write_compressed(&self, key: &str, packed: &str) -> bool {
        if let Err(e) = self.bounded.set_item(key, packed) {
            debug!(key, error = %e, "compressed write failed");
            return false;
        }
        if let Err(e) = self.bounded.set_item(&compressed_key(key), self.codec.marker()) {
            debug!(key, error = %e, "codec marker write failed");
            // The key now holds packed text with no marker; drop it.
            self.remove_quietly(key);
            return false;
        }
        true
    }

    fn write_chunks(&self, key: &str, body: &str, is_compressed: bool) -> bool {
        // Old segments and the stale direct value only take up room now.
        self.clear_chunks(key);
        self.remove_quietly(key);

        let segments = split_chars(body, self.chunk_size);
        for (index, segment) in segments.iter().enumerate() {
            if let Err(e) = self.bounded.set_item(&chunk_key(key, index), segment) {
                debug!(key, index, error = %e, "chunk write failed");
                self.remove_segments(key, index + 1);
                return false;
            }
        }

        let marker_written = self
            .bounded
            .set_item(&chunk_count_key(key), &segments.len().to_string())
            .and_then(|()| {
                if is_compressed {
                    self.bounded
                        .set_item(&compressed_key(key), self.codec.marker())
                } else {
                    self.bounded.remove_item(&compressed_key(key))
                }
            });
        if let Err(e) = marker_written {
            debug!(key, error = %e, "chunk marker write failed");
            self.remove_segments(key, segments.len());
            self.remove_quietly(&chunk_count_key(key));
            self.remove_quietly(&compressed_key(key));
            return false;
        }
        true
    }

    // ========================================================================
    // READ
    // ========================================================================

    /// Read a value back, whichever strategy stored it.
    ///
    /// A corrupt bounded-store entry is logged and skipped in favor of the
    /// secondary store.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.read_bounded(key) {
            Ok(Some(text)) => match serde_json::from_str(&text) {
                Ok(value) => return Some(value),
                Err(e) => warn!(key, error = %e, "stored value failed to parse"),
            },
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "bounded read failed"),
        }

        match self.secondary.get(key).await {
            Ok(Some(json)) => match serde_json::from_value(json) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "secondary value failed to parse");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "secondary read failed");
                None
            }
        }
    }

    fn read_bounded(&self, key: &str) -> Result<Option<String>, StorageError> {
        let raw = match self.bounded.get_item(&chunk_count_key(key))? {
            Some(count) => {
                let count: usize = count.trim().parse().map_err(|_| StorageError::Codec {
                    key: key.to_string(),
                    reason: format!("invalid chunk count {count:?}"),
                })?;
                let mut joined = String::new();
                for index in 0..count {
                    let segment = self.bounded.get_item(&chunk_key(key, index))?.ok_or_else(|| {
                        StorageError::Codec {
                            key: key.to_string(),
                            reason: format!("missing chunk {index} of {count}"),
                        }
                    })?;
                    joined.push_str(&segment);
                }
                joined
            }
            None => match self.bounded.get_item(key)? {
                Some(raw) => raw,
                None => return Ok(None),
            },
        };

        match self.bounded.get_item(&compressed_key(key))? {
            Some(marker) => {
                let codec = TextCodec::from_marker(&marker).ok_or_else(|| StorageError::Codec {
                    key: key.to_string(),
                    reason: format!("unknown codec marker {marker:?}"),
                })?;
                codec.decompress(key, &raw).map(Some)
            }
            None => Ok(Some(raw)),
        }
    }

    /// Which strategy currently holds `key`, if any.
    pub async fn locate(&self, key: &str) -> Option<StorageMethod> {
        let compressed = matches!(self.bounded.get_item(&compressed_key(key)), Ok(Some(_)));
        if matches!(self.bounded.get_item(&chunk_count_key(key)), Ok(Some(_))) {
            return Some(if compressed {
                StorageMethod::ChunkedCompressed
            } else {
                StorageMethod::Chunked
            });
        }
        if matches!(self.bounded.get_item(key), Ok(Some(_))) {
            return Some(if compressed {
                StorageMethod::Compressed
            } else {
                StorageMethod::Direct
            });
        }
        match self.secondary.get(key).await {
            Ok(Some(_)) => Some(StorageMethod::Secondary),
            _ => None,
        }
    }

    // ========================================================================
    // REMOVE
    // ========================================================================

    /// Remove every representation of `key` from both stores.
    pub async fn remove(&self, key: &str) -> RemoveOutcome {
        let bounded = self.clear_bounded_checked(key);
        let secondary = self.secondary.delete(key).await;
        match (bounded, secondary) {
            (Ok(()), Ok(_)) => RemoveOutcome::Removed,
            (Err(error), _) | (_, Err(error)) => {
                warn!(key, error = %error, "remove incomplete");
                RemoveOutcome::Failed { error }
            }
        }
    }

    // ========================================================================
    // HOUSEKEEPING
    // ========================================================================

    fn clear_bounded(&self, key: &str) {
        if let Err(e) = self.clear_bounded_checked(key) {
            warn!(key, error = %e, "failed to clear bounded entries");
        }
    }

    fn clear_bounded_checked(&self, key: &str) -> Result<(), StorageError> {
        self.clear_chunks(key);
        self.bounded.remove_item(key)?;
        self.bounded.remove_item(&compressed_key(key))?;
        self.bounded.remove_item(&chunk_count_key(key))
    }

    fn clear_chunks(&self, key: &str) {
        let count = match self.bounded.get_item(&chunk_count_key(key)) {
            Ok(Some(count)) => count.trim().parse::<usize>().unwrap_or(0),
            _ => return,
        };
        self.remove_segments(key, count);
        self.remove_quietly(&chunk_count_key(key));
    }

    fn remove_segments(&self, key: &str, count: usize) {
        for index in 0..count {
            self.remove_quietly(&chunk_key(key, index));
        }
    }

    fn remove_quietly(&self, key: &str) {
        if let Err(e) = self.bounded.remove_item(key) {
            debug!(key, error = %e, "remove failed");
        }
    }

    async fn drop_secondary_copy(&self, key: &str) {
        if let Err(e) = self.secondary.delete(key).await {
            debug!(key, error = %e, "failed to drop secondary copy");
        }
    }
}

impl std::fmt::Debug for PersistenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("usage", &self.bounded.usage())
            .field("codec", &self.codec)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Split on character boundaries into pieces of at most `size` characters.
fn split_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
