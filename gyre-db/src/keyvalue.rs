//! Last-writer-wins key-value view.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::{Database, Error, OpKind, Operation, Result};

/// Key-value semantics over a [`Database`].
///
/// Writes append `PUT`/`DEL` operations to the log; reads reduce the log
/// newest-first in the total clock order (hash as tiebreaker), so the value
/// of a key is decided by the newest operation touching it. Replicas that
/// have exchanged the same entries answer identically.
#[derive(Debug)]
pub struct KeyValue {
    db: Database,
}

impl KeyValue {
    /// Wrap a database in key-value semantics.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Write `value` under `key`. Returns the hash of the new entry.
    pub async fn put(&self, key: &str, value: Value) -> Result<String> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key is required".into()));
        }
        self.db.add_operation(&Operation::put(key, value)).await
    }

    /// Delete `key`. Returns the hash of the new entry.
    pub async fn del(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key is required".into()));
        }
        self.db.add_operation(&Operation::del(key)).await
    }

    /// The current value of `key`, or `None` if it was never written or the
    /// newest operation on it is a delete.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        for entry in self.db.log().values()?.iter().rev() {
            let op = match Operation::from_payload(&entry.payload) {
                Ok(op) => op,
                Err(err) => {
                    warn!("skipping unparseable payload in {}: {err}", entry.hash());
                    continue;
                }
            };
            if op.key.as_deref() != Some(key) {
                continue;
            }
            match op.op {
                OpKind::Put => return Ok(op.value),
                OpKind::Del => return Ok(None),
                OpKind::Add => continue,
            }
        }
        Ok(None)
    }

    /// All live key-value pairs.
    ///
    /// Each key's outcome is decided by the newest operation touching it;
    /// deleted keys are absent.
    pub fn all(&self) -> Result<BTreeMap<String, Value>> {
        let mut result = BTreeMap::new();
        let mut decided: HashSet<String> = HashSet::new();

        for entry in self.db.log().values()?.iter().rev() {
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
            if !decided.insert(key.clone()) {
                continue;
            }
            if op.op == OpKind::Put {
                if let Some(value) = op.value {
                    result.insert(key, value);
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use gyre_oplog::{Identity, Keystore};
    use gyre_sync::LocalPubSub;

    use super::*;
    use crate::Database;

    fn open_kv(address: &str, writer: &str, pubsub: &LocalPubSub, peer: &str) -> KeyValue {
        let keystore = Keystore::memory();
        let identity = Identity::create(&keystore, writer).unwrap();
        let db = Database::open(
            address,
            "kv",
            identity,
            None,
            Some(keystore),
            peer,
            pubsub.client(peer),
        )
        .unwrap();
        KeyValue::new(db)
    }

    #[tokio::test]
    async fn put_get_del() {
        let pubsub = LocalPubSub::new();
        let kv = open_kv("kv", "writer", &pubsub, "peer");

        kv.put("key1", json!("value1")).await.unwrap();
        kv.put("key2", json!("value2")).await.unwrap();
        assert_eq!(kv.get("key1").unwrap(), Some(json!("value1")));

        kv.del("key1").await.unwrap();
        assert_eq!(kv.get("key1").unwrap(), None);

        let all = kv.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["key2"], json!("value2"));

        kv.db().close().await.unwrap();
    }

    #[tokio::test]
    async fn newest_write_wins_locally() {
        let pubsub = LocalPubSub::new();
        let kv = open_kv("kv", "writer", &pubsub, "peer");

        kv.put("k", json!(1)).await.unwrap();
        kv.put("k", json!(2)).await.unwrap();
        kv.put("k", json!(3)).await.unwrap();
        assert_eq!(kv.get("k").unwrap(), Some(json!(3)));

        kv.db().close().await.unwrap();
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let pubsub = LocalPubSub::new();
        let kv = open_kv("kv", "writer", &pubsub, "peer");

        assert!(matches!(
            kv.put("", json!(1)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(kv.del("").await, Err(Error::InvalidArgument(_))));

        kv.db().close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let pubsub = LocalPubSub::new();
        let kv = open_kv("kv", "writer", &pubsub, "peer");
        assert_eq!(kv.get("nothing").unwrap(), None);
        kv.db().close().await.unwrap();
    }
}
