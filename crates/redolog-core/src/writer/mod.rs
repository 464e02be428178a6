//! Redo-log writer capability and backend selection.
//!
//! The manager core talks to durable storage exclusively through
//! [`RedoLogWriter`]: `write_events` appends a batch without any durability
//! promise, `flush_log` forces everything previously written out to the
//! backing store, and `close` releases resources. Backends are picked from
//! the storage URI scheme by [`new_log_writer`].

mod memory;
mod object_store_writer;

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::WriterError;
use crate::model::{ChangefeedId, RedoEvent};

pub use memory::MemoryLogWriter;
pub use object_store_writer::ObjectStoreLogWriter;

/// Which kind of redo log a writer produces.
///
/// Selects the log-file name component so row and DDL logs of one changefeed
/// never collide in the same storage prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileType {
    /// Row-change (DML) log.
    Row,
    /// Schema-change (DDL) log.
    Ddl,
}

impl std::fmt::Display for LogFileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Row => write!(f, "row"),
            Self::Ddl => write!(f, "ddl"),
        }
    }
}

/// Configuration handed to a log writer by the manager.
#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    /// Changefeed this log belongs to.
    pub changefeed: ChangefeedId,
    /// Row or DDL log.
    pub log_type: LogFileType,
    /// Storage URI (`memory://`, `file://`, `s3://`, `gs://`, `azure://`).
    pub storage: String,
    /// Rotation threshold in bytes. A log file is cut once its buffered
    /// size reaches this value.
    pub max_log_size: u64,
}

/// Capability consumed by the redo manager to persist events.
///
/// Methods take `&self` so the background worker and an in-flight flush task
/// can share one writer; implementations serialize internally.
#[async_trait]
pub trait RedoLogWriter: Send + Sync + std::fmt::Debug {
    /// Appends a batch of events. Durability is NOT implied until
    /// [`flush_log`](Self::flush_log) returns.
    async fn write_events(&self, events: &[RedoEvent]) -> Result<(), WriterError>;

    /// Forces durability of all previously written events.
    async fn flush_log(&self) -> Result<(), WriterError>;

    /// Flushes outstanding data and releases resources. The writer rejects
    /// all operations afterwards.
    async fn close(&self) -> Result<(), WriterError>;
}

/// Builds a writer for the storage URI in `cfg`.
///
/// `memory://` selects the in-process [`MemoryLogWriter`]; every other scheme
/// is resolved through [`object_store::parse_url`], so `file://` lands on the
/// local filesystem and `s3://` / `gs://` / `azure://` on the matching cloud
/// store.
///
/// # Errors
///
/// Returns [`WriterError::InvalidStorage`] when the URI does not parse and
/// [`WriterError::ObjectStore`] when the scheme is not recognised.
pub fn new_log_writer(cfg: &LogWriterConfig) -> Result<Arc<dyn RedoLogWriter>, WriterError> {
    let url = Url::parse(&cfg.storage)
        .map_err(|e| WriterError::InvalidStorage(format!("{}: {e}", cfg.storage)))?;
    if url.scheme() == "memory" {
        return Ok(Arc::new(MemoryLogWriter::new()));
    }
    let (store, prefix) = object_store::parse_url(&url)?;
    Ok(Arc::new(ObjectStoreLogWriter::new(
        Arc::from(store),
        prefix,
        cfg,
    )))
}
