//! In-process log writer.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::WriterError;
use crate::model::RedoEvent;
use crate::writer::RedoLogWriter;

#[derive(Default, Debug)]
struct MemoryLog {
    events: Vec<RedoEvent>,
    flushed_events: usize,
    flushes: u64,
    closed: bool,
}

/// Log writer that keeps everything in memory.
///
/// Selected by the `memory://` storage scheme. "Durable" here means the
/// events have been moved past the flush point; nothing survives the
/// process. Useful for changefeeds that want redo bookkeeping without a
/// storage bill, and as the observation point in tests.
#[derive(Default, Debug)]
pub struct MemoryLogWriter {
    log: Mutex<MemoryLog>,
}

impl MemoryLogWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events written so far, flushed or not.
    #[must_use]
    pub fn events(&self) -> Vec<RedoEvent> {
        self.log.lock().events.clone()
    }

    /// Number of events already past the flush point.
    #[must_use]
    pub fn flushed_events(&self) -> usize {
        self.log.lock().flushed_events
    }

    /// Number of completed `flush_log` calls.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.log.lock().flushes
    }
}

#[async_trait]
impl RedoLogWriter for MemoryLogWriter {
    async fn write_events(&self, events: &[RedoEvent]) -> Result<(), WriterError> {
        let mut log = self.log.lock();
        if log.closed {
            return Err(WriterError::Closed);
        }
        log.events.extend_from_slice(events);
        Ok(())
    }

    async fn flush_log(&self) -> Result<(), WriterError> {
        let mut log = self.log.lock();
        if log.closed {
            return Err(WriterError::Closed);
        }
        log.flushed_events = log.events.len();
        log.flushes += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), WriterError> {
        let mut log = self.log.lock();
        log.flushed_events = log.events.len();
        log.closed = true;
        Ok(())
    }
}
