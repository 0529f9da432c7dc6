use gyre_store::StoreError;

/// Errors produced by the oplog.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An entry or identity could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(String),
    /// An encoded record carried an unsupported format version.
    #[error("unsupported entry version {0}")]
    UnsupportedVersion(u64),
    /// A signature did not verify.
    #[error("invalid signature for {0}")]
    InvalidSignature(String),
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The underlying storage adapter failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub(crate) fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}
