//! Per-log synchronization over a pub/sub topic.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gyre_oplog::{EncodedEntry, Log};

use crate::{PubSub, Result, SyncError, Topic, TopicMessage};

/// Prefix of the per-log topic name.
pub const TOPIC_PREFIX: &str = "orbit-sync/";

/// Maximum size of a published envelope.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Capacity of the synced-entries channel.
///
/// When the consumer falls behind, further remote entries are dropped with a
/// warning; replication is best-effort and dropped entries are recovered the
/// next time the peers exchange state.
const SYNCED_CAP: usize = 64;

/// Wire envelope: the publisher's peer id plus the canonical encoded bytes
/// of one entry, verbatim. Publishing the canonical bytes keeps content
/// addresses identical on every peer.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    peer_id: String,
    entry: Vec<u8>,
}

/// An entry received from a peer.
#[derive(Debug, Clone)]
pub struct SyncedEntry {
    /// Peer id the entry was received from.
    pub peer_id: String,
    /// The decoded entry. Not yet verified or joined.
    pub entry: EncodedEntry,
}

/// Synchronizes one [`Log`] over a pub/sub topic.
///
/// [`Sync::start`] joins `orbit-sync/<log id>` and spawns a single receiver
/// task; remote entries are decoded and surfaced on the channel returned by
/// [`Sync::synced`]. The sync layer never mutates the log on receive — the
/// database pipeline decides when to join entries.
#[derive(Debug)]
pub struct Sync {
    peer_id: String,
    pubsub: Arc<dyn PubSub>,
    log: Arc<Log>,
    topic_name: String,
    topic: Mutex<Option<Arc<dyn Topic>>>,
    synced_tx: flume::Sender<SyncedEntry>,
    synced_rx: flume::Receiver<SyncedEntry>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sync {
    /// Create a sync instance for `log`, publishing as `peer_id`.
    pub fn new(peer_id: &str, pubsub: Arc<dyn PubSub>, log: Arc<Log>) -> Self {
        let topic_name = format!("{TOPIC_PREFIX}{}", log.id());
        let (synced_tx, synced_rx) = flume::bounded(SYNCED_CAP);
        Self {
            peer_id: peer_id.to_owned(),
            pubsub,
            log,
            topic_name,
            topic: Mutex::new(None),
            synced_tx,
            synced_rx,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// The local peer id.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The topic this log gossips on.
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Channel of entries received from peers.
    pub fn synced(&self) -> flume::Receiver<SyncedEntry> {
        self.synced_rx.clone()
    }

    /// Join the topic, subscribe, and spawn the receiver task.
    ///
    /// Returns once the subscription is established, so a publish issued
    /// right after `start` has a live topic. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let mut topic_slot = self.topic.lock();
        if topic_slot.is_some() {
            return Ok(());
        }
        let topic = self.pubsub.join(&self.topic_name)?;
        let rx = topic.subscribe()?;
        *topic_slot = Some(topic);

        let task = tokio::spawn(receive_loop(
            rx,
            self.peer_id.clone(),
            self.synced_tx.clone(),
            self.cancel.clone(),
        ));
        *self.task.lock() = Some(task);
        debug!("sync started on {}", self.topic_name);
        Ok(())
    }

    /// Cancel the receiver task, wait for it, and leave the topic.
    ///
    /// Idempotent and terminal: a stopped instance cannot be restarted.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("sync receiver task failed: {err}");
            }
        }
        let topic = self.topic.lock().take();
        if let Some(topic) = topic {
            topic.close()?;
        }
        Ok(())
    }

    /// Append `payload` to the log and broadcast the resulting entry.
    pub fn add(&self, payload: &str) -> Result<EncodedEntry> {
        let entry = self.log.append(payload)?;
        self.broadcast(&entry)?;
        Ok(entry)
    }

    /// Broadcast an already-appended entry to the topic.
    pub fn broadcast(&self, entry: &EncodedEntry) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let topic = self
            .topic
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Transport("sync is not started".into()))?;

        let envelope = Envelope {
            peer_id: self.peer_id.clone(),
            entry: entry.bytes().to_vec(),
        };
        let data = postcard::to_stdvec(&envelope).map_err(|err| SyncError::Codec(err.to_string()))?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(SyncError::Transport(format!(
                "envelope of {} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit",
                data.len()
            )));
        }
        topic.publish(Bytes::from(data))?;
        debug!("broadcast entry {}", entry.hash());
        Ok(())
    }

    /// Peer ids currently subscribed to the topic.
    pub fn discover_peers(&self) -> Vec<String> {
        self.topic
            .lock()
            .as_ref()
            .map(|topic| topic.peers())
            .unwrap_or_default()
    }
}

/// Single receiver task: drops own messages, decodes envelopes, and pushes
/// entries onto the synced channel. Malformed messages are logged and
/// skipped; the loop ends on cancellation or when the topic closes.
async fn receive_loop(
    rx: flume::Receiver<TopicMessage>,
    peer_id: String,
    synced_tx: flume::Sender<SyncedEntry>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv_async() => match msg {
                Ok(msg) => msg,
                Err(_) => break,
            },
        };

        if msg.from == peer_id {
            continue;
        }

        let envelope: Envelope = match postcard::from_bytes(&msg.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("skipping malformed gossip message from {}: {err}", msg.from);
                continue;
            }
        };
        let entry = match EncodedEntry::decode(&envelope.entry) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping undecodable entry from {}: {err}", envelope.peer_id);
                continue;
            }
        };

        let synced = SyncedEntry {
            peer_id: envelope.peer_id,
            entry,
        };
        if synced_tx.try_send(synced).is_err() {
            warn!("synced channel full, dropping entry from {}", msg.from);
        }
    }
    debug!("sync receiver stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use anyhow::Result;
    use gyre_oplog::{Identity, Keystore};

    use super::*;
    use crate::LocalPubSub;

    fn new_log(log_id: &str, writer: &str) -> Arc<Log> {
        let keystore = Keystore::memory();
        let identity = Identity::create(&keystore, writer).unwrap();
        Arc::new(Log::new(log_id, identity, None, Some(keystore)).unwrap())
    }

    #[tokio::test]
    async fn add_reaches_the_other_peer() -> Result<()> {
        let pubsub = LocalPubSub::new();
        let log_a = new_log("log", "writer-a");
        let log_b = new_log("log", "writer-b");

        let sync_a = Sync::new("peer-a", pubsub.client("peer-a"), log_a);
        let sync_b = Sync::new("peer-b", pubsub.client("peer-b"), log_b.clone());
        sync_a.start()?;
        sync_b.start()?;

        let sent = sync_a.add("hello")?;

        let synced = sync_b.synced();
        let received = tokio::time::timeout(Duration::from_secs(2), synced.recv_async()).await??;
        assert_eq!(received.peer_id, "peer-a");
        assert_eq!(received.entry.hash(), sent.hash());

        // the receiving side can join the entry verbatim
        let mut processed = HashSet::new();
        log_b.join_entry(&received.entry, &mut processed)?;
        assert_eq!(log_b.head()?.hash(), sent.hash());

        sync_a.stop().await?;
        sync_b.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn own_messages_are_dropped() {
        let pubsub = LocalPubSub::new();
        let log = new_log("log", "writer");
        let sync = Sync::new("peer", pubsub.client("peer"), log);
        sync.start().unwrap();

        sync.add("solo").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sync.synced().try_recv().is_err());

        sync.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_add_fails_after() {
        let pubsub = LocalPubSub::new();
        let log = new_log("log", "writer");
        let sync = Sync::new("peer", pubsub.client("peer"), log);

        assert!(sync.add("before start").is_err());

        sync.start().unwrap();
        sync.stop().await.unwrap();
        sync.stop().await.unwrap();
        assert!(matches!(sync.add("x"), Err(SyncError::Cancelled)));
        assert!(matches!(sync.start(), Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn discover_peers_lists_topic_members() -> Result<()> {
        let pubsub = LocalPubSub::new();
        let sync_a = Sync::new("peer-a", pubsub.client("peer-a"), new_log("log", "a"));
        let sync_b = Sync::new("peer-b", pubsub.client("peer-b"), new_log("log", "b"));
        sync_a.start()?;
        sync_b.start()?;

        assert_eq!(
            sync_a.discover_peers(),
            vec!["peer-a".to_owned(), "peer-b".to_owned()]
        );

        sync_a.stop().await?;
        sync_b.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let pubsub = LocalPubSub::new();
        let log = new_log("log", "writer");
        let sync = Sync::new("peer", pubsub.client("peer"), log);
        sync.start().unwrap();

        let big = "x".repeat(MAX_MESSAGE_SIZE);
        assert!(matches!(sync.add(&big), Err(SyncError::Transport(_))));

        sync.stop().await.unwrap();
    }
}
