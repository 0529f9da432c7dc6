//! The pub/sub transport contract.
//!
//! The sync protocol only needs topic-scoped best-effort broadcast: join a
//! named topic, publish opaque bytes, receive what others publish, and see
//! who is currently on the topic. No delivery or ordering guarantees are
//! assumed; duplicates are tolerated by the log's dedup-by-hash.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

use crate::Result;

/// A message delivered on a topic.
#[derive(Debug, Clone)]
pub struct TopicMessage {
    /// Peer id of the publisher.
    pub from: String,
    /// Opaque payload bytes.
    pub data: Bytes,
}

/// A joined topic.
pub trait Topic: Debug + Send + Sync + 'static {
    /// The topic name.
    fn name(&self) -> &str;

    /// Broadcast `data` to all current subscribers, including the
    /// publisher's own subscriptions.
    fn publish(&self, data: Bytes) -> Result<()>;

    /// Receive messages published on this topic from now on.
    ///
    /// The returned channel is bounded; messages that arrive while it is
    /// full may be dropped by the transport.
    fn subscribe(&self) -> Result<flume::Receiver<TopicMessage>>;

    /// Peer ids currently joined to the topic.
    fn peers(&self) -> Vec<String>;

    /// Leave the topic and release its resources. Idempotent.
    fn close(&self) -> Result<()>;
}

/// A pub/sub transport bound to one local peer.
pub trait PubSub: Debug + Send + Sync + 'static {
    /// Join the named topic, registering this peer as a member.
    fn join(&self, topic: &str) -> Result<Arc<dyn Topic>>;
}
