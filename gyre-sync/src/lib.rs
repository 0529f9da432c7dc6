//! Gossip-based synchronization of gyre logs.
//!
//! A [`Sync`] instance advertises locally appended entries on a per-log
//! pub/sub topic and surfaces entries received from peers on a bounded
//! channel. The transport itself is consumed through the [`PubSub`] /
//! [`Topic`] contract; [`LocalPubSub`] is an in-process reference
//! implementation for tests and single-host setups.
//!
//! Only canonical encoded entry bytes ever travel on the wire, so every
//! replica derives the same content address for an entry and merges
//! deduplicate correctly.

mod local;
mod pubsub;
mod sync;

pub use self::local::LocalPubSub;
pub use self::pubsub::{PubSub, Topic, TopicMessage};
pub use self::sync::{Sync, SyncedEntry, MAX_MESSAGE_SIZE, TOPIC_PREFIX};

/// Errors produced by the sync layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The pub/sub transport failed.
    #[error("transport: {0}")]
    Transport(String),
    /// A wire message could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(String),
    /// The operation observed shutdown.
    #[error("sync stopped")]
    Cancelled,
    /// The underlying log rejected an operation.
    #[error(transparent)]
    Oplog(#[from] gyre_oplog::Error),
}

/// Result alias for sync operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
