//! In-memory storage.

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{Result, StoreError, Storage, StoreIter};

/// Unbounded in-memory store.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Storage for MemoryStore {
    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.inner.write().insert(key.to_owned(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Bytes> {
        self.inner
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn iter(&self) -> Result<StoreIter> {
        let snapshot: Vec<(String, Bytes)> = self
            .inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn clear(&self) -> Result<()> {
        self.inner.write().clear();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.put("k", Bytes::from_static(b"v")).unwrap();
        assert_eq!(b.get("k").unwrap(), Bytes::from_static(b"v"));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn iter_is_a_snapshot() {
        let store = MemoryStore::new();
        store.put("a", Bytes::from_static(b"1")).unwrap();
        let iter = store.iter().unwrap();
        store.put("b", Bytes::from_static(b"2")).unwrap();
        assert_eq!(iter.count(), 1);
    }
}
