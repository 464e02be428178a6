//! Lock-free redo manager metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Redo manager metrics using atomics (no locks on the data path).
#[derive(Debug, Default)]
pub struct RedoMetrics {
    /// Total rows written to the log writer.
    pub total_rows: AtomicU64,
    /// Total event batches written.
    pub write_batches: AtomicU64,
    /// Last `write_events` latency in nanoseconds.
    pub last_write_ns: AtomicU64,
    /// Completed flush attempts (successful or not).
    pub flushes: AtomicU64,
    /// Last flush latency in nanoseconds.
    pub last_flush_ns: AtomicU64,
    /// Accumulated worker busy ratio, in per-mille summed over each
    /// sampling window.
    pub busy_ratio_permille: AtomicU64,
}

impl RedoMetrics {
    /// Records a completed `write_events` call.
    pub fn record_write(&self, rows: u64, latency_ns: u64) {
        self.write_batches.fetch_add(1, Ordering::Relaxed);
        self.total_rows.fetch_add(rows, Ordering::Relaxed);
        self.last_write_ns.store(latency_ns, Ordering::Relaxed);
    }

    /// Records a completed flush attempt.
    pub fn record_flush(&self, latency_ns: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.last_flush_ns.store(latency_ns, Ordering::Relaxed);
    }

    /// Adds one sampling window's busy ratio (per mille).
    pub fn record_busy_ratio(&self, permille: u64) {
        self.busy_ratio_permille.fetch_add(permille, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> RedoMetricsSnapshot {
        RedoMetricsSnapshot {
            total_rows: self.total_rows.load(Ordering::Relaxed),
            write_batches: self.write_batches.load(Ordering::Relaxed),
            last_write_ns: self.last_write_ns.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            last_flush_ns: self.last_flush_ns.load(Ordering::Relaxed),
            busy_ratio_permille: self.busy_ratio_permille.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of redo manager metrics.
#[derive(Debug, Clone, Copy)]
pub struct RedoMetricsSnapshot {
    /// Total rows written.
    pub total_rows: u64,
    /// Total event batches written.
    pub write_batches: u64,
    /// Last write latency in nanoseconds.
    pub last_write_ns: u64,
    /// Completed flush attempts.
    pub flushes: u64,
    /// Last flush latency in nanoseconds.
    pub last_flush_ns: u64,
    /// Accumulated busy ratio in per mille.
    pub busy_ratio_permille: u64,
}
