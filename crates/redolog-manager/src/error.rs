//! Error types for the redo manager.

use redolog_core::model::TableId;
use redolog_core::WriterError;

/// Errors from redo manager operations.
#[derive(Debug, thiserror::Error)]
pub enum RedoError {
    /// A facade operation arrived after the manager was closed.
    #[error("redo manager is stopped")]
    ManagerStopped,

    /// The worker's cancellation token fired.
    #[error("redo manager run is cancelled")]
    Cancelled,

    /// Resolved-timestamp lookup for a table that was never added or has
    /// already been removed.
    #[error("unknown table {0} in redo manager")]
    UnknownTable(TableId),

    /// Configuration validation failure.
    #[error("invalid redo config: {0}")]
    InvalidConfig(String),

    /// Write or flush failure from the log writer. Fatal to the worker.
    #[error(transparent)]
    Writer(#[from] WriterError),
}
