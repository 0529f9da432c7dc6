use gyre_store::StoreError;
use gyre_sync::SyncError;

/// Errors produced by the database layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An operation payload could not be serialized or parsed.
    #[error("operation codec: {0}")]
    Codec(#[from] serde_json::Error),
    /// The database pipeline has shut down.
    #[error("database closed")]
    Closed,
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation log rejected an operation.
    #[error(transparent)]
    Oplog(#[from] gyre_oplog::Error),
    /// The sync layer failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// The underlying storage adapter failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
