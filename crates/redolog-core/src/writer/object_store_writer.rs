//! Object-store backed log writer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::WriterError;
use crate::model::{ChangefeedId, RedoEvent, Ts};
use crate::writer::{LogFileType, LogWriterConfig, RedoLogWriter};

#[derive(Debug)]
struct LogBuffer {
    buf: BytesMut,
    /// Sequence number of the next log file to upload.
    seq: u64,
    /// Greatest commit timestamp among the buffered events.
    max_commit_ts: Ts,
    closed: bool,
}

/// Log writer that appends JSON-lines encoded events to objects under a
/// storage prefix, named by the greatest commit timestamp they contain plus
/// a sequence number.
///
/// Events accumulate in an in-memory buffer; a new log object is cut as soon
/// as the buffer reaches the configured rotation threshold, and `flush_log`
/// uploads whatever remains. An event is durable once the object holding it
/// has been put, so everything written before a successful `flush_log` is on
/// the backing store.
#[derive(Debug)]
pub struct ObjectStoreLogWriter {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    changefeed: ChangefeedId,
    log_type: LogFileType,
    max_log_size: u64,
    state: Mutex<LogBuffer>,
}

impl ObjectStoreLogWriter {
    /// Creates a writer over `store`, placing log files under `prefix`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Path, cfg: &LogWriterConfig) -> Self {
        Self {
            store,
            prefix,
            changefeed: cfg.changefeed.clone(),
            log_type: cfg.log_type,
            max_log_size: cfg.max_log_size.max(1),
            state: Mutex::new(LogBuffer {
                buf: BytesMut::new(),
                seq: 0,
                max_commit_ts: 0,
                closed: false,
            }),
        }
    }

    fn log_path(&self, seq: u64, max_commit_ts: Ts) -> Path {
        self.prefix.child(format!(
            "{}_{}_{}_{max_commit_ts}_{seq:020}.log",
            self.changefeed.namespace, self.changefeed.id, self.log_type
        ))
    }

    /// Uploads the buffered bytes as the next log file. No-op on an empty
    /// buffer.
    async fn upload(&self, log: &mut LogBuffer) -> Result<(), WriterError> {
        if log.buf.is_empty() {
            return Ok(());
        }
        let path = self.log_path(log.seq, log.max_commit_ts);
        let payload = PutPayload::from_bytes(log.buf.split().freeze());
        self.store.put(&path, payload).await?;
        log.seq += 1;
        log.max_commit_ts = 0;
        debug!(changefeed = %self.changefeed, path = %path, "uploaded redo log file");
        Ok(())
    }
}

#[async_trait]
impl RedoLogWriter for ObjectStoreLogWriter {
    async fn write_events(&self, events: &[RedoEvent]) -> Result<(), WriterError> {
        let mut log = self.state.lock().await;
        if log.closed {
            return Err(WriterError::Closed);
        }
        for event in events {
            let line = serde_json::to_vec(event)?;
            log.buf.extend_from_slice(&line);
            log.buf.put_u8(b'\n');
            log.max_commit_ts = log.max_commit_ts.max(event.commit_ts());
            if log.buf.len() as u64 >= self.max_log_size {
                self.upload(&mut log).await?;
            }
        }
        Ok(())
    }

    async fn flush_log(&self) -> Result<(), WriterError> {
        let mut log = self.state.lock().await;
        if log.closed {
            return Err(WriterError::Closed);
        }
        self.upload(&mut log).await
    }

    async fn close(&self) -> Result<(), WriterError> {
        let mut log = self.state.lock().await;
        if log.closed {
            return Ok(());
        }
        log.closed = true;
        self.upload(&mut log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DdlEvent;
    use object_store::memory::InMemory;

    fn writer_with(max_log_size: u64) -> (ObjectStoreLogWriter, Arc<dyn ObjectStore>) {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let cfg = LogWriterConfig {
            changefeed: ChangefeedId::new("default", "cf-1"),
            log_type: LogFileType::Ddl,
            storage: "memory://".into(),
            max_log_size,
        };
        let writer = ObjectStoreLogWriter::new(Arc::clone(&store), Path::from("redo"), &cfg);
        (writer, store)
    }

    fn ddl(commit_ts: u64) -> RedoEvent {
        RedoEvent::Ddl(DdlEvent {
            commit_ts,
            schema: "db".into(),
            table: "t".into(),
            query: "TRUNCATE TABLE t".into(),
        })
    }

    #[tokio::test]
    async fn flush_uploads_buffered_events() {
        let (writer, store) = writer_with(64 * 1024 * 1024);
        writer.write_events(&[ddl(1), ddl(2)]).await.unwrap();

        // Nothing uploaded before the flush. The file carries the greatest
        // buffered commit ts.
        let first = writer.log_path(0, 2);
        assert!(store.head(&first).await.is_err());

        writer.flush_log().await.unwrap();
        let data = store.get(&first).await.unwrap().bytes().await.unwrap();
        assert_eq!(data.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count(), 2);
    }

    #[tokio::test]
    async fn oversized_buffer_rotates_mid_write() {
        let (writer, store) = writer_with(1);
        writer.write_events(&[ddl(1), ddl(2)]).await.unwrap();

        // One object per event: the 1-byte threshold cuts a file each time.
        assert!(store.head(&writer.log_path(0, 1)).await.is_ok());
        assert!(store.head(&writer.log_path(1, 2)).await.is_ok());
    }

    #[tokio::test]
    async fn close_flushes_remaining_buffer() {
        let (writer, store) = writer_with(64 * 1024 * 1024);
        writer.write_events(&[ddl(1)]).await.unwrap();
        writer.close().await.unwrap();

        assert!(store.head(&writer.log_path(0, 1)).await.is_ok());
        assert!(matches!(
            writer.write_events(&[ddl(2)]).await.unwrap_err(),
            WriterError::Closed
        ));
    }
}
