//! Two-tier storage composition.

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use tracing::warn;

use crate::{Result, StoreError, Storage, StoreIter};

/// Read-through/write-through composition of two stores.
///
/// Reads try the fast tier first and fall back to the slow tier, populating
/// the fast tier on a hit. Writes, deletes, and clears apply to both tiers.
/// Iteration merges both tiers; the fast tier wins on key collisions.
#[derive(Debug, Clone)]
pub struct ComposedStore {
    fast: Arc<dyn Storage>,
    slow: Arc<dyn Storage>,
}

impl ComposedStore {
    /// Compose `fast` (e.g. an [`crate::LruStore`]) over `slow`.
    pub fn new(fast: Arc<dyn Storage>, slow: Arc<dyn Storage>) -> Self {
        Self { fast, slow }
    }
}

impl Storage for ComposedStore {
    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.fast.put(key, value.clone())?;
        self.slow.put(key, value)
    }

    fn get(&self, key: &str) -> Result<Bytes> {
        match self.fast.get(key) {
            Ok(value) => Ok(value),
            Err(StoreError::NotFound(_)) => {
                let value = self.slow.get(key)?;
                if let Err(err) = self.fast.put(key, value.clone()) {
                    warn!("failed to populate fast tier for {key}: {err}");
                }
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.fast.delete(key)?;
        self.slow.delete(key)
    }

    fn iter(&self) -> Result<StoreIter> {
        let mut merged: BTreeMap<String, Bytes> = self.slow.iter()?.collect();
        for (key, value) in self.fast.iter()? {
            merged.insert(key, value);
        }
        Ok(Box::new(merged.into_iter()))
    }

    fn clear(&self) -> Result<()> {
        self.fast.clear()?;
        self.slow.clear()
    }

    fn close(&self) -> Result<()> {
        self.fast.close()?;
        self.slow.close()
    }
}
