//! Signed, content-addressed, append-only operation log.
//!
//! A [`Log`] is a partially ordered set of immutable [`Entry`] records owned
//! by one writer identity and replicated across peers. Every entry is
//! encoded into a canonical dag-cbor form, signed with the writer's key, and
//! addressed by the base58btc CID of its encoding. Entries reference their
//! causal predecessors by hash, forming a DAG; a per-writer Lamport
//! [`LamportClock`] provides the total order used for merges and for the
//! deterministic reductions built on top of the log.
//!
//! Replicas converge by exchanging entries: [`Log::join_entry`] deduplicates
//! by content hash, verifies signatures, and tracks the entry with the
//! greatest clock as the local head. Two logs that have seen the same set of
//! entries are identical.

mod clock;
mod entry;
mod error;
mod identity;
mod keystore;
mod log;

pub use self::clock::LamportClock;
pub use self::entry::{Entry, EncodedEntry, ENTRY_VERSION};
pub use self::error::Error;
pub use self::identity::{Identity, IdentitySignatures, PROVIDER_PUBLICKEY};
pub use self::keystore::Keystore;
pub use self::log::Log;

/// Result alias for oplog operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
