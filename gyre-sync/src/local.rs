//! In-process pub/sub transport.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

use crate::{PubSub, Result, Topic, TopicMessage};

/// Capacity of each subscriber's delivery buffer.
const SUBSCRIBE_CAP: usize = 256;

/// Shared in-process topic registry.
///
/// One `LocalPubSub` is shared by all participants of a process; each
/// participant obtains its own transport handle with [`LocalPubSub::client`].
/// Publishing fans out to every subscriber of the topic with bounded
/// buffers: delivery to a full subscriber is dropped with a warning, which
/// is acceptable for a best-effort gossip stand-in.
#[derive(Debug, Clone, Default)]
pub struct LocalPubSub {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

#[derive(Debug, Default)]
struct TopicState {
    /// Subscriber delivery queues, per joined peer.
    subscribers: HashMap<String, Vec<flume::Sender<TopicMessage>>>,
}

impl LocalPubSub {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport handle bound to `peer_id`.
    pub fn client(&self, peer_id: &str) -> Arc<dyn PubSub> {
        Arc::new(LocalClient {
            peer_id: peer_id.to_owned(),
            topics: self.topics.clone(),
        })
    }
}

/// Per-peer handle into a [`LocalPubSub`] registry.
#[derive(Debug)]
struct LocalClient {
    peer_id: String,
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl PubSub for LocalClient {
    fn join(&self, topic: &str) -> Result<Arc<dyn Topic>> {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_owned())
            .or_default()
            .subscribers
            .entry(self.peer_id.clone())
            .or_default();
        Ok(Arc::new(LocalTopic {
            name: topic.to_owned(),
            peer_id: self.peer_id.clone(),
            topics: self.topics.clone(),
        }))
    }
}

#[derive(Debug)]
struct LocalTopic {
    name: String,
    peer_id: String,
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl Topic for LocalTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, data: Bytes) -> Result<()> {
        let mut topics = self.topics.lock();
        let Some(state) = topics.get_mut(&self.name) else {
            return Ok(());
        };
        for (peer, queues) in state.subscribers.iter_mut() {
            queues.retain(|tx| !tx.is_disconnected());
            for tx in queues.iter() {
                let msg = TopicMessage {
                    from: self.peer_id.clone(),
                    data: data.clone(),
                };
                if tx.try_send(msg).is_err() {
                    warn!("dropping message for slow subscriber {peer} on {}", self.name);
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<flume::Receiver<TopicMessage>> {
        let (tx, rx) = flume::bounded(SUBSCRIBE_CAP);
        let mut topics = self.topics.lock();
        topics
            .entry(self.name.clone())
            .or_default()
            .subscribers
            .entry(self.peer_id.clone())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn peers(&self) -> Vec<String> {
        let topics = self.topics.lock();
        let mut peers: Vec<String> = topics
            .get(&self.name)
            .map(|state| state.subscribers.keys().cloned().collect())
            .unwrap_or_default();
        peers.sort_unstable();
        peers
    }

    fn close(&self) -> Result<()> {
        let mut topics = self.topics.lock();
        if let Some(state) = topics.get_mut(&self.name) {
            state.subscribers.remove(&self.peer_id);
            if state.subscribers.is_empty() {
                topics.remove(&self.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn publish_reaches_all_subscribers() -> Result<()> {
        let pubsub = LocalPubSub::new();
        let a = pubsub.client("peer-a").join("t")?;
        let b = pubsub.client("peer-b").join("t")?;

        let sub_a = a.subscribe()?;
        let sub_b = b.subscribe()?;

        a.publish(Bytes::from_static(b"hello"))?;

        let msg = sub_b.recv()?;
        assert_eq!(msg.from, "peer-a");
        assert_eq!(msg.data, Bytes::from_static(b"hello"));

        // delivery includes the publisher's own subscription
        assert_eq!(sub_a.recv()?.from, "peer-a");
        Ok(())
    }

    #[test]
    fn peers_tracks_joins_and_closes() -> Result<()> {
        let pubsub = LocalPubSub::new();
        let a = pubsub.client("peer-a").join("t")?;
        let b = pubsub.client("peer-b").join("t")?;

        assert_eq!(a.peers(), vec!["peer-a".to_owned(), "peer-b".to_owned()]);

        a.close()?;
        assert_eq!(b.peers(), vec!["peer-b".to_owned()]);
        Ok(())
    }

    #[test]
    fn full_subscriber_drops_instead_of_blocking() -> Result<()> {
        let pubsub = LocalPubSub::new();
        let topic = pubsub.client("peer-a").join("t")?;
        let sub = topic.subscribe()?;

        for _ in 0..SUBSCRIBE_CAP + 10 {
            topic.publish(Bytes::from_static(b"m"))?;
        }
        assert_eq!(sub.len(), SUBSCRIBE_CAP);
        Ok(())
    }

    #[test]
    fn topics_are_isolated() -> Result<()> {
        let pubsub = LocalPubSub::new();
        let t1 = pubsub.client("peer-a").join("one")?;
        let t2 = pubsub.client("peer-b").join("two")?;
        let sub = t2.subscribe()?;

        t1.publish(Bytes::from_static(b"m"))?;
        assert!(sub.try_recv().is_err());
        Ok(())
    }
}
