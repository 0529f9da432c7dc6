//! Database views over the gyre operation log.
//!
//! A [`Database`] pairs a [`gyre_oplog::Log`] with a [`gyre_sync::Sync`]
//! instance and serializes every mutation through a bounded task queue
//! drained by a single worker. Local writes go through
//! [`Database::add_operation`]; entries gossiped by peers are joined by the
//! same worker, so the observable order of [`Event`]s is deterministic per
//! database instance.
//!
//! On top of the pipeline sit four views, each a deterministic reduction
//! over the log:
//!
//! * [`KeyValue`] — last-writer-wins key-value semantics.
//! * [`KeyValueIndexed`] — the same semantics read through a materialized
//!   secondary index.
//! * [`Documents`] — documents keyed by an index field (default `_id`).
//! * [`Events`] — an immutable event feed with ordered, bounded iteration.

mod database;
mod documents;
mod error;
mod events;
mod keyvalue;
mod keyvalue_indexed;
mod operation;

pub use self::database::{Database, Event};
pub use self::documents::{Documents, DEFAULT_INDEX_BY};
pub use self::error::Error;
pub use self::events::{EventBounds, EventRecord, Events};
pub use self::keyvalue::KeyValue;
pub use self::keyvalue_indexed::{IndexedEntry, KeyValueIndexed};
pub use self::operation::{OpKind, Operation};

/// Result alias for database operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
