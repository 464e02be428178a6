//! Error types for the log-writer layer.

/// Errors from redo-log writer operations.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Object store I/O error.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Event serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage URI did not parse or its scheme is not supported.
    #[error("invalid storage uri: {0}")]
    InvalidStorage(String),

    /// Operation on a writer that has already been closed.
    #[error("redo log writer is closed")]
    Closed,
}
