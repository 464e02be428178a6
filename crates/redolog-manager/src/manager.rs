//! Redo manager facades and the background worker.
//!
//! [`DmlManager`] and [`DdlManager`] are thin wrappers over one shared core:
//! facade calls enqueue messages onto an unbounded channel, and a single
//! worker task ([`DmlManager::run`]) drains it, writing event batches to the
//! log writer and folding resolved timestamps into the watermark registry.
//! Each flush tick spawns at most one background flush that snapshots the
//! registry, forces the writer out, and promotes the snapshot on success.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use redolog_core::model::{
    ChangefeedId, DdlEvent, RedoEvent, RowChangedEvent, TableId, Ts, DDL_TABLE_ID,
};
use redolog_core::writer::{new_log_writer, LogFileType, LogWriterConfig, RedoLogWriter};

use crate::config::{ConsistentConfig, FLUSH_WARN_THRESHOLD};
use crate::error::RedoError;
use crate::metrics::RedoMetrics;
use crate::rts::ResolvedTsRegistry;

/// Callback handed in with an event batch and invoked once that batch has
/// gone through a flush. Upstream uses it to release memory-quota
/// accounting for buffered rows.
pub type ReleaseMemoryCallback = Box<dyn FnOnce() + Send>;

/// Period of the worker busy-ratio sampling window.
const OVERSEER_INTERVAL: Duration = Duration::from_secs(5);

enum QueueMessage {
    Events {
        table_id: TableId,
        events: Vec<RedoEvent>,
        release_memory: Option<ReleaseMemoryCallback>,
    },
    ResolvedTs {
        table_id: TableId,
        resolved_ts: Ts,
    },
}

/// Shared core behind the DML and DDL facades.
struct LogManager {
    enabled: bool,
    changefeed: ChangefeedId,
    flush_interval: Duration,
    writer: Option<Arc<dyn RedoLogWriter>>,
    queue_tx: Option<UnboundedSender<QueueMessage>>,
    /// Taken exactly once by `run`.
    queue_rx: Mutex<Option<UnboundedReceiver<QueueMessage>>>,
    /// Facade sends and the flush task hold this shared; `close` holds it
    /// exclusive so the writer cannot be flushed and closed concurrently.
    rwlock: RwLock<()>,
    closed: AtomicBool,
    /// Single-slot flush mutex: set while a flush task is in flight.
    flushing: AtomicBool,
    last_flush_time: Mutex<Instant>,
    rts: ResolvedTsRegistry,
    metrics: Arc<RedoMetrics>,
}

impl LogManager {
    fn new(
        cfg: &ConsistentConfig,
        changefeed: ChangefeedId,
        log_type: LogFileType,
    ) -> Result<Self, RedoError> {
        if !cfg.level.is_enabled() {
            return Ok(Self::disabled());
        }
        let writer = new_log_writer(&LogWriterConfig {
            changefeed: changefeed.clone(),
            log_type,
            storage: cfg.storage.clone(),
            max_log_size: cfg.max_log_size_bytes(),
        })?;
        Ok(Self::with_writer(cfg, changefeed, writer))
    }

    fn with_writer(
        cfg: &ConsistentConfig,
        changefeed: ChangefeedId,
        writer: Arc<dyn RedoLogWriter>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            enabled: true,
            changefeed,
            flush_interval: cfg.flush_interval(),
            writer: Some(writer),
            queue_tx: Some(queue_tx),
            queue_rx: Mutex::new(Some(queue_rx)),
            rwlock: RwLock::new(()),
            closed: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            last_flush_time: Mutex::new(Instant::now()),
            rts: ResolvedTsRegistry::default(),
            metrics: Arc::new(RedoMetrics::default()),
        }
    }

    fn disabled() -> Self {
        Self {
            enabled: false,
            changefeed: ChangefeedId::new("", ""),
            flush_interval: Duration::from_millis(crate::config::DEFAULT_FLUSH_INTERVAL_MS),
            writer: None,
            queue_tx: None,
            queue_rx: Mutex::new(None),
            rwlock: RwLock::new(()),
            closed: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            last_flush_time: Mutex::new(Instant::now()),
            rts: ResolvedTsRegistry::default(),
            metrics: Arc::new(RedoMetrics::default()),
        }
    }

    fn check_open(&self) -> Result<(), RedoError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RedoError::ManagerStopped);
        }
        Ok(())
    }

    fn add_table(&self, table_id: TableId, start_ts: Ts) -> Result<(), RedoError> {
        if !self.enabled {
            return Ok(());
        }
        self.check_open()?;
        self.rts.add(table_id, start_ts);
        Ok(())
    }

    /// Applies the starting watermark synchronously, bypassing the queue, so
    /// it is visible before any event of the table flows.
    fn start_table(&self, table_id: TableId, start_ts: Ts) -> Result<(), RedoError> {
        if !self.enabled {
            return Ok(());
        }
        self.check_open()?;
        self.rts.observe(table_id, start_ts);
        Ok(())
    }

    fn remove_table(&self, table_id: TableId) -> Result<(), RedoError> {
        if !self.enabled {
            return Ok(());
        }
        self.check_open()?;
        self.rts.remove(table_id);
        Ok(())
    }

    fn get_resolved_ts(&self, table_id: TableId) -> Result<Ts, RedoError> {
        self.rts
            .read(table_id)
            .ok_or(RedoError::UnknownTable(table_id))
    }

    async fn send(&self, msg: QueueMessage) -> Result<(), RedoError> {
        if !self.enabled {
            return Ok(());
        }
        let _guard = self.rwlock.read().await;
        self.check_open()?;
        let Some(queue_tx) = &self.queue_tx else {
            return Ok(());
        };
        queue_tx.send(msg).map_err(|_| RedoError::ManagerStopped)
    }

    async fn emit_redo_events(
        &self,
        table_id: TableId,
        release_memory: Option<ReleaseMemoryCallback>,
        events: Vec<RedoEvent>,
    ) -> Result<(), RedoError> {
        self.send(QueueMessage::Events {
            table_id,
            events,
            release_memory,
        })
        .await
    }

    async fn update_resolved_ts(
        &self,
        table_id: TableId,
        resolved_ts: Ts,
    ) -> Result<(), RedoError> {
        self.send(QueueMessage::ResolvedTs {
            table_id,
            resolved_ts,
        })
        .await
    }

    /// Runs the background worker until cancellation, a write/flush error,
    /// or queue end. Closes the manager on the way out.
    async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), RedoError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(mut queue_rx) = self.queue_rx.lock().take() else {
            warn!(
                namespace = %self.changefeed.namespace,
                changefeed = %self.changefeed.id,
                "redo manager run called more than once"
            );
            return Err(RedoError::ManagerStopped);
        };
        let result = self.bg_update_log(&mut queue_rx, cancel).await;
        self.close(&mut queue_rx).await;
        result
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn bg_update_log(
        self: &Arc<Self>,
        queue_rx: &mut UnboundedReceiver<QueueMessage>,
        cancel: CancellationToken,
    ) -> Result<(), RedoError> {
        info!(
            namespace = %self.changefeed.namespace,
            changefeed = %self.changefeed.id,
            flush_interval = ?self.flush_interval,
            "redo manager worker is running"
        );
        let mut release_cbs: Vec<ReleaseMemoryCallback> = Vec::with_capacity(1024);
        // Capacity 1 suffices: the worker exits on the first flush error.
        let (err_tx, mut err_rx) = mpsc::channel::<RedoError>(1);

        let mut flush_ticker = tokio::time::interval(self.flush_interval);
        flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        flush_ticker.tick().await;
        let mut overseer_ticker = tokio::time::interval(OVERSEER_INTERVAL);
        overseer_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        overseer_ticker.tick().await;

        let mut work_slice = Duration::ZERO;
        let mut window_start = Instant::now();

        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => return Err(RedoError::Cancelled),
                _ = flush_ticker.tick() => {
                    self.flush_log(&mut release_cbs, &err_tx, &cancel, &mut work_slice);
                    Ok(())
                }
                msg = queue_rx.recv() => match msg {
                    Some(msg) => self.handle_event(msg, &mut release_cbs, &mut work_slice).await,
                    None => return Ok(()),
                },
                _ = overseer_ticker.tick() => {
                    let wall = window_start.elapsed();
                    if !wall.is_zero() {
                        let busy = work_slice.as_secs_f64() / wall.as_secs_f64() * 1000.0;
                        self.metrics.record_busy_ratio(busy as u64);
                    }
                    window_start = Instant::now();
                    work_slice = Duration::ZERO;
                    Ok(())
                }
                Some(err) = err_rx.recv() => Err(err),
            };
            if let Err(err) = result {
                warn!(
                    namespace = %self.changefeed.namespace,
                    changefeed = %self.changefeed.id,
                    error = %err,
                    "redo manager writer meets write or flush failure"
                );
                return Err(err);
            }
        }
    }

    async fn handle_event(
        &self,
        msg: QueueMessage,
        release_cbs: &mut Vec<ReleaseMemoryCallback>,
        work_slice: &mut Duration,
    ) -> Result<(), RedoError> {
        let start = Instant::now();
        match msg {
            QueueMessage::ResolvedTs {
                table_id,
                resolved_ts,
            } => {
                self.rts.observe(table_id, resolved_ts);
            }
            QueueMessage::Events {
                table_id,
                events,
                release_memory,
            } => {
                if let Some(release) = release_memory {
                    release_cbs.push(release);
                }
                if let Some(writer) = &self.writer {
                    let write_start = Instant::now();
                    writer.write_events(&events).await?;
                    let elapsed = write_start.elapsed();
                    debug!(
                        namespace = %self.changefeed.namespace,
                        changefeed = %self.changefeed.id,
                        table_id,
                        rows = events.len(),
                        elapsed = ?elapsed,
                        "redo manager writes rows"
                    );
                    #[allow(clippy::cast_possible_truncation)]
                    self.metrics
                        .record_write(events.len() as u64, elapsed.as_nanos() as u64);
                }
            }
        }
        *work_slice += start.elapsed();
        Ok(())
    }

    /// Flush-tick entry point. Claims the single flush slot and spawns the
    /// flush task; a tick arriving while a flush is still in flight is a
    /// no-op (the next tick retries). The task races `cancel` so a flush
    /// caught mid-write by shutdown is abandoned instead of promoted.
    fn flush_log(
        self: &Arc<Self>,
        release_cbs: &mut Vec<ReleaseMemoryCallback>,
        err_tx: &mpsc::Sender<RedoError>,
        cancel: &CancellationToken,
        work_slice: &mut Duration,
    ) {
        let start = Instant::now();
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous redo flush has not finished yet, skipping this tick");
            let since_last = self.last_flush_time.lock().elapsed();
            if since_last > FLUSH_WARN_THRESHOLD {
                warn!(
                    namespace = %self.changefeed.namespace,
                    changefeed = %self.changefeed.id,
                    elapsed = ?since_last,
                    "redo flush is blocking too long, the manager may be stuck"
                );
            }
            *work_slice += start.elapsed();
            return;
        }

        *self.last_flush_time.lock() = Instant::now();
        let to_release = std::mem::take(release_cbs);
        let manager = Arc::clone(self);
        let err_tx = err_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let flush_start = Instant::now();
            let result = tokio::select! {
                () = cancel.cancelled() => Err(RedoError::Cancelled),
                result = manager.flush_under_lock() => result,
            };
            for release in to_release {
                release();
            }
            #[allow(clippy::cast_possible_truncation)]
            manager
                .metrics
                .record_flush(flush_start.elapsed().as_nanos() as u64);
            match result {
                Ok(snapshot) => manager.rts.promote(&snapshot),
                // An abandoned flush has nothing to report; the worker is
                // already on its way out.
                Err(RedoError::Cancelled) => {}
                Err(err) => {
                    // The worker may already be gone; nobody left to tell.
                    let _ = err_tx.send(err).await;
                }
            }
            manager.flushing.store(false, Ordering::Release);
        });
        *work_slice += start.elapsed();
    }

    /// Snapshots the registry and forces the writer out, both under the
    /// shared lock so neither can race with `close`. Watermarks observed
    /// after the snapshot wait for the next flush; every event written
    /// before a watermark in the snapshot is covered by this `flush_log`.
    async fn flush_under_lock(&self) -> Result<HashMap<TableId, Ts>, RedoError> {
        let _guard = self.rwlock.read().await;
        self.check_open()?;
        let snapshot = self.rts.snapshot();
        debug!(
            namespace = %self.changefeed.namespace,
            changefeed = %self.changefeed.id,
            tables = snapshot.len(),
            "flushing redo log"
        );
        if let Some(writer) = &self.writer {
            writer.flush_log().await?;
        }
        Ok(snapshot)
    }

    async fn close(&self, queue_rx: &mut UnboundedReceiver<QueueMessage>) {
        let _guard = self.rwlock.write().await;
        self.closed.store(true, Ordering::Release);

        queue_rx.close();
        while queue_rx.try_recv().is_ok() {}

        if let Some(writer) = &self.writer {
            if let Err(error) = writer.close().await {
                error!(
                    namespace = %self.changefeed.namespace,
                    changefeed = %self.changefeed.id,
                    error = %error,
                    "redo manager fails to close writer"
                );
            }
        }
        info!(
            namespace = %self.changefeed.namespace,
            changefeed = %self.changefeed.id,
            "redo manager closed"
        );
    }
}

/// Redo manager for row-change (DML) events, one per processor.
#[derive(Clone)]
pub struct DmlManager {
    log: Arc<LogManager>,
}

impl DmlManager {
    /// Creates a DML redo manager. A non-enabled consistent level yields a
    /// disabled manager whose operations are all no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error when the storage URI cannot be turned into a writer.
    pub fn new(cfg: &ConsistentConfig, changefeed: ChangefeedId) -> Result<Self, RedoError> {
        Ok(Self {
            log: Arc::new(LogManager::new(cfg, changefeed, LogFileType::Row)?),
        })
    }

    /// Creates a disabled DML manager.
    #[must_use]
    pub fn new_disabled() -> Self {
        Self {
            log: Arc::new(LogManager::disabled()),
        }
    }

    /// Creates an enabled DML manager over a caller-supplied writer.
    #[must_use]
    pub fn new_with_writer(
        cfg: &ConsistentConfig,
        changefeed: ChangefeedId,
        writer: Arc<dyn RedoLogWriter>,
    ) -> Self {
        Self {
            log: Arc::new(LogManager::with_writer(cfg, changefeed, writer)),
        }
    }

    /// Whether redo logging is enabled for this changefeed.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.log.enabled
    }

    /// Runs the background worker until `cancel` fires, a write or flush
    /// error occurs, or the queue ends. The manager is closed on return and
    /// rejects all further mutations.
    ///
    /// A disabled manager returns `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// [`RedoError::Cancelled`] on cancellation; the underlying
    /// [`RedoError::Writer`] error when writing or flushing failed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RedoError> {
        self.log.run(cancel).await
    }

    /// Registers a table with both watermarks at `start_ts`.
    ///
    /// # Errors
    ///
    /// [`RedoError::ManagerStopped`] after close.
    pub fn add_table(&self, table_id: TableId, start_ts: Ts) -> Result<(), RedoError> {
        self.log.add_table(table_id, start_ts)
    }

    /// Marks a table ready to emit events, applying its starting watermark
    /// synchronously. Idempotent.
    ///
    /// # Errors
    ///
    /// [`RedoError::ManagerStopped`] after close.
    pub fn start_table(&self, table_id: TableId, start_ts: Ts) -> Result<(), RedoError> {
        self.log.start_table(table_id, start_ts)
    }

    /// Unregisters a table. Watermark messages still queued for it are
    /// silently dropped.
    ///
    /// # Errors
    ///
    /// [`RedoError::ManagerStopped`] after close.
    pub fn remove_table(&self, table_id: TableId) -> Result<(), RedoError> {
        self.log.remove_table(table_id)
    }

    /// Enqueues a batch of row-change events for the log writer.
    /// `release_memory` is invoked once the batch has gone through a flush.
    ///
    /// # Errors
    ///
    /// [`RedoError::ManagerStopped`] after close.
    pub async fn emit_row_changed_events(
        &self,
        table_id: TableId,
        release_memory: Option<ReleaseMemoryCallback>,
        rows: Vec<RowChangedEvent>,
    ) -> Result<(), RedoError> {
        let events = rows.into_iter().map(RedoEvent::Row).collect();
        self.log
            .emit_redo_events(table_id, release_memory, events)
            .await
    }

    /// Asynchronously advances a table's resolved timestamp.
    ///
    /// # Errors
    ///
    /// [`RedoError::ManagerStopped`] after close.
    pub async fn update_resolved_ts(
        &self,
        table_id: TableId,
        resolved_ts: Ts,
    ) -> Result<(), RedoError> {
        self.log.update_resolved_ts(table_id, resolved_ts).await
    }

    /// Flushed resolved timestamp of a table: every event at or below it is
    /// durably persisted.
    ///
    /// # Errors
    ///
    /// [`RedoError::UnknownTable`] for a table never added or already
    /// removed.
    pub fn get_resolved_ts(&self, table_id: TableId) -> Result<Ts, RedoError> {
        self.log.get_resolved_ts(table_id)
    }

    /// Handle to the manager's metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<RedoMetrics> {
        Arc::clone(&self.log.metrics)
    }
}

/// Redo manager for DDL events, one per changefeed owner.
///
/// Reuses the per-table machinery by tracking all DDLs under the sentinel
/// [`DDL_TABLE_ID`].
#[derive(Clone)]
pub struct DdlManager {
    log: Arc<LogManager>,
}

impl DdlManager {
    /// Creates a DDL redo manager with its watermark starting at
    /// `ddl_start_ts`. A non-enabled consistent level yields a disabled
    /// manager.
    ///
    /// # Errors
    ///
    /// Returns an error when the storage URI cannot be turned into a writer.
    pub fn new(
        cfg: &ConsistentConfig,
        changefeed: ChangefeedId,
        ddl_start_ts: Ts,
    ) -> Result<Self, RedoError> {
        let log = LogManager::new(cfg, changefeed, LogFileType::Ddl)?;
        log.add_table(DDL_TABLE_ID, ddl_start_ts)?;
        Ok(Self { log: Arc::new(log) })
    }

    /// Creates a disabled DDL manager.
    #[must_use]
    pub fn new_disabled() -> Self {
        Self {
            log: Arc::new(LogManager::disabled()),
        }
    }

    /// Creates an enabled DDL manager over a caller-supplied writer.
    #[must_use]
    pub fn new_with_writer(
        cfg: &ConsistentConfig,
        changefeed: ChangefeedId,
        writer: Arc<dyn RedoLogWriter>,
        ddl_start_ts: Ts,
    ) -> Self {
        let log = LogManager::with_writer(cfg, changefeed, writer);
        // The manager was just created; it cannot be closed yet.
        let _ = log.add_table(DDL_TABLE_ID, ddl_start_ts);
        Self { log: Arc::new(log) }
    }

    /// Whether redo logging is enabled for this changefeed.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.log.enabled
    }

    /// Runs the background worker. See [`DmlManager::run`].
    ///
    /// # Errors
    ///
    /// [`RedoError::Cancelled`] on cancellation; the underlying
    /// [`RedoError::Writer`] error when writing or flushing failed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RedoError> {
        self.log.run(cancel).await
    }

    /// Enqueues a DDL event for the log writer.
    ///
    /// # Errors
    ///
    /// [`RedoError::ManagerStopped`] after close.
    pub async fn emit_ddl_event(&self, ddl: DdlEvent) -> Result<(), RedoError> {
        self.log
            .emit_redo_events(DDL_TABLE_ID, None, vec![RedoEvent::Ddl(ddl)])
            .await
    }

    /// Asynchronously advances the DDL resolved timestamp.
    ///
    /// # Errors
    ///
    /// [`RedoError::ManagerStopped`] after close.
    pub async fn update_resolved_ts(&self, resolved_ts: Ts) -> Result<(), RedoError> {
        self.log
            .update_resolved_ts(DDL_TABLE_ID, resolved_ts)
            .await
    }

    /// Flushed DDL resolved timestamp.
    ///
    /// # Errors
    ///
    /// [`RedoError::UnknownTable`] on a disabled manager.
    pub fn get_resolved_ts(&self) -> Result<Ts, RedoError> {
        self.log.get_resolved_ts(DDL_TABLE_ID)
    }

    /// Handle to the manager's metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<RedoMetrics> {
        Arc::clone(&self.log.metrics)
    }
}
