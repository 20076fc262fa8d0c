//! Secondary, larger-capacity store used when the bounded store is full.
//!
//! Values are kept as structured JSON rather than text, so nothing here needs
//! the codec or chunking. Two backends ship: an LMDB environment on disk and
//! an in-memory map for tests and ephemeral sessions.

pub mod lmdb;
pub mod memory;
pub mod traits;

pub use lmdb::{LmdbSecondaryStore, LmdbStoreError};
pub use memory::InMemorySecondaryStore;
pub use traits::SecondaryStore;
