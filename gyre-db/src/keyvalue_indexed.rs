//! Key-value view with a materialized secondary index.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use gyre_store::{Storage, StoreError};

use crate::{KeyValue, OpKind, Operation, Result};

/// What the index stores per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    hash: String,
    value: Value,
}

/// One row of the index, as returned by [`KeyValueIndexed::iter`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    /// The key.
    pub key: String,
    /// Hash of the entry that wrote the current value.
    pub hash: String,
    /// The current value.
    pub value: Value,
}

/// A [`KeyValue`] view backed by a materialized index for fast lookups.
///
/// [`KeyValueIndexed::update_index`] scans the log in ascending total order
/// and applies each entry exactly once (tracked in a `processed` set), so
/// after an update the index equals the last-writer-wins reduction of all
/// entries seen so far. Reads then hit the index directly instead of
/// reducing the log.
#[derive(Debug)]
pub struct KeyValueIndexed {
    kv: KeyValue,
    index: Arc<dyn Storage>,
    processed: Mutex<HashSet<String>>,
}

impl KeyValueIndexed {
    /// Wrap a key-value view, materializing into `index`.
    pub fn new(kv: KeyValue, index: Arc<dyn Storage>) -> Self {
        Self {
            kv,
            index,
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// The wrapped key-value view.
    pub fn keyvalue(&self) -> &KeyValue {
        &self.kv
    }

    /// Write `value` under `key` through the underlying view.
    pub async fn put(&self, key: &str, value: Value) -> Result<String> {
        self.kv.put(key, value).await
    }

    /// Delete `key` through the underlying view.
    pub async fn del(&self, key: &str) -> Result<String> {
        self.kv.del(key).await
    }

    /// Bring the index up to date with the log.
    ///
    /// Entries are applied in ascending total order so that replaying after
    /// replication converges on the last-writer-wins state. Unparseable
    /// payloads are skipped (and not retried).
    pub fn update_index(&self) -> Result<()> {
        let mut processed = self.processed.lock();
        for entry in self.kv.db().log().values()? {
            if processed.contains(entry.hash()) {
                continue;
            }
            match Operation::from_payload(&entry.payload) {
                Ok(op) => self.apply(entry.hash(), op)?,
                Err(err) => {
                    warn!("index: skipping unparseable payload in {}: {err}", entry.hash());
                }
            }
            processed.insert(entry.hash().to_owned());
        }
        Ok(())
    }

    fn apply(&self, hash: &str, op: Operation) -> Result<()> {
        match (op.op, op.key) {
            (OpKind::Put, Some(key)) => {
                let record = IndexRecord {
                    hash: hash.to_owned(),
                    value: op.value.unwrap_or(Value::Null),
                };
                let bytes = serde_json::to_vec(&record)?;
                self.index.put(&key, Bytes::from(bytes))?;
            }
            (OpKind::Del, Some(key)) => {
                self.index.delete(&key)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Look up `key` in the index.
    ///
    /// Reflects the state as of the last [`KeyValueIndexed::update_index`].
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.index.get(key) {
            Ok(bytes) => {
                let record: IndexRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(record.value))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Index rows sorted by key ascending, truncated to `amount` when it is
    /// positive.
    pub fn iter(&self, amount: i64) -> Result<Vec<IndexedEntry>> {
        let mut rows = Vec::new();
        for (key, bytes) in self.index.iter()? {
            match serde_json::from_slice::<IndexRecord>(&bytes) {
                Ok(record) => rows.push(IndexedEntry {
                    key,
                    hash: record.hash,
                    value: record.value,
                }),
                Err(err) => warn!("index: skipping undecodable row {key}: {err}"),
            }
        }
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        if amount > 0 {
            rows.truncate(amount as usize);
        }
        Ok(rows)
    }

    /// Clear the log, the index, and the processed set.
    pub async fn drop_all(&self) -> Result<()> {
        self.kv.db().drop_all().await?;
        self.index.clear()?;
        self.processed.lock().clear();
        Ok(())
    }

    /// Close the underlying database and the index storage.
    pub async fn close(&self) -> Result<()> {
        self.kv.db().close().await?;
        self.index.close()?;
        Ok(())
    }
}
