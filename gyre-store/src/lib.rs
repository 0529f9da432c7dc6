//! Byte-blob key-value storage for gyre.
//!
//! Everything above the storage layer talks to a [`Storage`] trait object:
//! a small put/get/delete/iterate contract over string keys and opaque byte
//! values. The append-only log keeps encoded entries here keyed by their
//! content hash, the keystore keeps serialized private keys, and the indexed
//! key-value view keeps its materialized index.
//!
//! Three reference adapters are provided:
//!
//! * [`MemoryStore`] — unbounded in-memory map, the default everywhere.
//! * [`LruStore`] — bounded in-memory map with LRU eviction.
//! * [`ComposedStore`] — a read-through/write-through pairing of a fast and
//!   a slow store.
//!
//! Iteration order is unspecified by the contract; callers that need
//! determinism must sort.

use std::fmt::Debug;

use bytes::Bytes;

mod composed;
mod lru;
mod memory;

pub use self::composed::ComposedStore;
pub use self::lru::LruStore;
pub use self::memory::MemoryStore;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key is not present in the store.
    #[error("key not found: {0}")]
    NotFound(String),
    /// The underlying backend failed.
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Owned iterator over the key-value pairs of a store.
///
/// Adapters yield a snapshot taken at call time; concurrent writes are not
/// reflected.
pub type StoreIter = Box<dyn Iterator<Item = (String, Bytes)> + Send>;

/// A byte-blob key-value store.
///
/// `get` after `put` on the same key returns the same bytes until the key is
/// overwritten or deleted. All methods take `&self`; implementations are
/// internally synchronized and safe to share behind an [`std::sync::Arc`].
pub trait Storage: Debug + Send + Sync + 'static {
    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Retrieve the value stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent.
    fn get(&self, key: &str) -> Result<Bytes>;

    /// Remove `key` from the store. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Iterate over a snapshot of all key-value pairs.
    fn iter(&self) -> Result<StoreIter>;

    /// Copy every entry of `other` into this store.
    fn merge(&self, other: &dyn Storage) -> Result<()> {
        for (key, value) in other.iter()? {
            self.put(&key, value)?;
        }
        Ok(())
    }

    /// Remove all entries.
    fn clear(&self) -> Result<()>;

    /// Release any resources held by the store.
    fn close(&self) -> Result<()>;
}
