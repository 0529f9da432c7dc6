//! Document view keyed by an index field.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::{Error, KeyValue, OpKind, Operation, Result};

/// Default field documents are keyed by.
pub const DEFAULT_INDEX_BY: &str = "_id";

/// Structured documents over a [`KeyValue`] view.
///
/// Every document must be a JSON object carrying the index field (default
/// [`DEFAULT_INDEX_BY`]) as a non-empty string; that field's value is the
/// document's key. Reads resolve each key to its newest live revision, so a
/// superseded or deleted document never surfaces.
#[derive(Debug)]
pub struct Documents {
    kv: KeyValue,
    index_by: String,
}

impl Documents {
    /// Wrap a key-value view, keying documents by `index_by` (or
    /// [`DEFAULT_INDEX_BY`] when `None`).
    pub fn new(kv: KeyValue, index_by: Option<&str>) -> Self {
        let index_by = match index_by {
            Some(field) if !field.is_empty() => field.to_owned(),
            _ => DEFAULT_INDEX_BY.to_owned(),
        };
        Self { kv, index_by }
    }

    /// The wrapped key-value view.
    pub fn keyvalue(&self) -> &KeyValue {
        &self.kv
    }

    /// The field documents are keyed by.
    pub fn index_by(&self) -> &str {
        &self.index_by
    }

    /// Store a document. Returns the hash of the new entry.
    pub async fn put(&self, doc: Value) -> Result<String> {
        let key = doc
            .get(&self.index_by)
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "document must contain field '{}' as a non-empty string",
                    self.index_by
                ))
            })?
            .to_owned();
        self.kv
            .db()
            .add_operation(&Operation::put(key, doc))
            .await
    }

    /// The newest live revision of the document keyed by `id`.
    pub fn get(&self, id: &str) -> Result<Option<Value>> {
        self.kv.get(id)
    }

    /// Delete the document keyed by `id`.
    pub async fn del(&self, id: &str) -> Result<String> {
        self.kv.del(id).await
    }

    /// Documents whose newest live revision satisfies `predicate`, in log
    /// order of that revision.
    pub fn query(&self, predicate: impl Fn(&Value) -> bool) -> Result<Vec<Value>> {
        let mut live: Vec<(usize, Value)> = self
            .reduce()?
            .into_values()
            .flatten()
            .collect();
        live.sort_by_key(|(position, _)| *position);
        Ok(live
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| predicate(doc))
            .collect())
    }

    /// All live documents, keyed by their id.
    pub fn all(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .reduce()?
            .into_iter()
            .filter_map(|(key, slot)| slot.map(|(_, doc)| (key, doc)))
            .collect())
    }

    /// Fold the log into `key -> newest revision`, where a deletion leaves
    /// `None` and the position records where the winning write sits in
    /// ascending log order.
    fn reduce(&self) -> Result<BTreeMap<String, Option<(usize, Value)>>> {
        let mut newest: BTreeMap<String, Option<(usize, Value)>> = BTreeMap::new();
        for (position, entry) in self.kv.db().log().values()?.iter().enumerate() {
            let op = match Operation::from_payload(&entry.payload) {
                Ok(op) => op,
                Err(err) => {
                    warn!("skipping unparseable payload in {}: {err}", entry.hash());
                    continue;
                }
            };
            let Some(key) = op.key else {
                continue;
            };
            match op.op {
                OpKind::Put => {
                    newest.insert(key, op.value.map(|doc| (position, doc)));
                }
                OpKind::Del => {
                    newest.insert(key, None);
                }
                OpKind::Add => {}
            }
        }
        Ok(newest)
    }
}
