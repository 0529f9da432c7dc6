//! Bounded in-memory storage with LRU eviction.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::{Result, StoreError, Storage, StoreIter};

const DEFAULT_CAPACITY: usize = 1_000_000;

/// In-memory store that holds at most `capacity` entries.
///
/// The least recently used entry is evicted silently when the store is full.
/// `get` refreshes recency.
#[derive(Debug)]
pub struct LruStore {
    inner: Mutex<LruCache<String, Bytes>>,
}

impl LruStore {
    /// Create a store bounded to `capacity` entries.
    ///
    /// A capacity of zero falls back to the default capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).expect("nonzero"));
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for LruStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Storage for LruStore {
    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.inner.lock().put(key.to_owned(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Bytes> {
        self.inner
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().pop(key);
        Ok(())
    }

    fn iter(&self) -> Result<StoreIter> {
        let snapshot: Vec<(String, Bytes)> = self
            .inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn clear(&self) -> Result<()> {
        self.inner.lock().clear();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
