//! End-to-end scenarios over the database views.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use gyre_db::{
    Database, Documents, EventBounds, Events, KeyValue, KeyValueIndexed, Operation,
};
use gyre_oplog::{Identity, Keystore};
use gyre_store::MemoryStore;
use gyre_sync::LocalPubSub;

fn open_db(address: &str, writer: &str, pubsub: &LocalPubSub, peer: &str) -> Result<Database> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let keystore = Keystore::memory();
    let identity = Identity::create(&keystore, writer)?;
    Ok(Database::open(
        address,
        "test",
        identity,
        None,
        Some(keystore),
        peer,
        pubsub.client(peer),
    )?)
}

/// Poll `read` until it returns `Some` or the timeout elapses.
async fn eventually<T>(mut read: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(value) = read() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within the timeout");
}

#[tokio::test]
async fn s1_keyvalue_put_get_del() -> Result<()> {
    let pubsub = LocalPubSub::new();
    let kv = KeyValue::new(open_db("s1", "writer", &pubsub, "peer")?);

    kv.put("key1", json!("value1")).await?;
    kv.put("key2", json!("value2")).await?;
    assert_eq!(kv.get("key1")?, Some(json!("value1")));

    kv.del("key1").await?;
    assert_eq!(kv.get("key1")?, None);

    let all = kv.all()?;
    assert_eq!(all.len(), 1);
    assert_eq!(all["key2"], json!("value2"));

    kv.db().close().await?;
    Ok(())
}

#[tokio::test]
async fn s2_lww_tiebreaks_on_writer_id() -> Result<()> {
    // isolated transports: replication happens only through the explicit join
    let pubsub_a = LocalPubSub::new();
    let pubsub_b = LocalPubSub::new();
    let kv_a = KeyValue::new(open_db("s2", "writer-a", &pubsub_a, "peer-a")?);
    let kv_b = KeyValue::new(open_db("s2", "writer-b", &pubsub_b, "peer-b")?);

    kv_a.put("k", json!("A@t1")).await?;
    kv_b.put("k", json!("B@t1")).await?;

    // both entries carry time=1, so the lexicographically greater writer id wins
    kv_a.db().log().join(kv_b.db().log())?;
    assert_eq!(kv_a.get("k")?, Some(json!("B@t1")));

    kv_b.db().log().join(kv_a.db().log())?;
    assert_eq!(kv_b.get("k")?, Some(json!("B@t1")));

    // full convergence after the cross-merge
    assert_eq!(kv_a.all()?, kv_b.all()?);

    kv_a.db().close().await?;
    kv_b.db().close().await?;
    Ok(())
}

#[tokio::test]
async fn s3_documents_query_and_delete() -> Result<()> {
    let pubsub = LocalPubSub::new();
    let docs = Documents::new(
        KeyValue::new(open_db("s3", "writer", &pubsub, "peer")?),
        None,
    );

    docs.put(json!({"_id": "doc1", "type": "test", "value": 10}))
        .await?;
    docs.put(json!({"_id": "doc2", "type": "test", "value": 20}))
        .await?;
    docs.put(json!({"_id": "doc3", "type": "other", "value": 30}))
        .await?;

    let tests = docs.query(|doc| doc["type"] == json!("test"))?;
    let mut ids: Vec<&str> = tests.iter().filter_map(|d| d["_id"].as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["doc1", "doc2"]);

    assert_eq!(docs.all()?.len(), 3);

    docs.del("doc2").await?;
    let all = docs.all()?;
    assert_eq!(all.len(), 2);
    assert!(all.contains_key("doc1"));
    assert!(all.contains_key("doc3"));

    docs.keyvalue().db().close().await?;
    Ok(())
}

#[tokio::test]
async fn s4_events_iterator_bounds() -> Result<()> {
    let pubsub = LocalPubSub::new();
    let events = Events::new(open_db("s4", "writer", &pubsub, "peer")?);

    let h1 = events.add(json!("E1")).await?;
    let h2 = events.add(json!("E2")).await?;
    let h3 = events.add(json!("E3")).await?;

    let tail = events.iter(&EventBounds::all().gte(format!("2:{h2}")), -1)?;
    let hashes: Vec<&str> = tail.iter().map(|r| r.hash.as_str()).collect();
    assert_eq!(hashes, vec![h2.as_str(), h3.as_str()]);

    let head = events.iter(&EventBounds::all().lte(format!("2:{h2}")), -1)?;
    let hashes: Vec<&str> = head.iter().map(|r| r.hash.as_str()).collect();
    assert_eq!(hashes, vec![h1.as_str(), h2.as_str()]);

    events.db().close().await?;
    Ok(())
}

#[tokio::test]
async fn s5_indexed_keyvalue_convergence_and_drop() -> Result<()> {
    let pubsub = LocalPubSub::new();
    let kvi = KeyValueIndexed::new(
        KeyValue::new(open_db("s5", "writer", &pubsub, "peer")?),
        Arc::new(MemoryStore::new()),
    );

    kvi.put("k1", json!("v1")).await?;
    kvi.put("k2", json!("v2")).await?;
    kvi.update_index()?;

    assert_eq!(kvi.get("k1")?, Some(json!("v1")));

    let rows = kvi.iter(-1)?;
    let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["k1", "k2"]);

    kvi.drop_all().await?;
    assert!(kvi.keyvalue().all()?.is_empty());
    assert_eq!(kvi.get("k1")?, None);

    kvi.close().await?;
    Ok(())
}

#[tokio::test]
async fn s6_sync_end_to_end() -> Result<()> {
    let pubsub = LocalPubSub::new();
    let kv_a = KeyValue::new(open_db("s6", "writer-a", &pubsub, "peer-a")?);
    let kv_b = KeyValue::new(open_db("s6", "writer-b", &pubsub, "peer-b")?);

    kv_a.put("k", json!("v")).await?;

    let replicated: Value = eventually(|| kv_b.get("k").unwrap()).await;
    assert_eq!(replicated, json!("v"));

    // the replicated state survives the writer going away
    kv_a.db().close().await?;
    assert_eq!(kv_b.get("k")?, Some(json!("v")));

    kv_b.db().close().await?;
    Ok(())
}

#[tokio::test]
async fn replicas_converge_on_concurrent_writes() -> Result<()> {
    let pubsub = LocalPubSub::new();
    let kv_a = KeyValue::new(open_db("conv", "writer-a", &pubsub, "peer-a")?);
    let kv_b = KeyValue::new(open_db("conv", "writer-b", &pubsub, "peer-b")?);

    kv_a.put("a", json!(1)).await?;
    kv_b.put("b", json!(2)).await?;
    kv_a.put("shared", json!("from-a")).await?;
    kv_b.put("shared", json!("from-b")).await?;

    eventually(|| {
        let a = kv_a.all().unwrap();
        let b = kv_b.all().unwrap();
        (a.len() == 3 && a == b).then_some(())
    })
    .await;

    // the winner of "shared" is decided by the clock order, identically on
    // both sides
    assert_eq!(kv_a.get("shared")?, kv_b.get("shared")?);

    kv_a.db().close().await?;
    kv_b.db().close().await?;
    Ok(())
}

#[tokio::test]
async fn heads_are_maximal_after_replication() -> Result<()> {
    let pubsub = LocalPubSub::new();
    let a = open_db("heads", "writer-a", &pubsub, "peer-a")?;
    let b = open_db("heads", "writer-b", &pubsub, "peer-b")?;

    a.add_operation(&Operation::add(json!(1))).await?;
    a.add_operation(&Operation::add(json!(2))).await?;

    eventually(|| (b.log().values().unwrap().len() == 2).then_some(())).await;

    // on both replicas the head is the greatest (clock, hash) entry
    for db in [&a, &b] {
        let values = db.log().values()?;
        let max = values.last().unwrap();
        assert_eq!(db.log().head()?.hash(), max.hash());
    }
    assert_eq!(a.log().head()?.hash(), b.log().head()?.hash());

    a.close().await?;
    b.close().await?;
    Ok(())
}
