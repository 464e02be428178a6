//! Per-table resolved-timestamp state.
//!
//! Each live table owns a [`StatefulRts`] cell holding two timestamps:
//! `unflushed` (greatest watermark received, advanced by the worker) and
//! `flushed` (greatest watermark known durable, advanced by the flush task).
//! At all times `flushed <= unflushed` and neither ever decreases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use redolog_core::model::{TableId, Ts};

/// Atomically updated pair of resolved timestamps for one table.
///
/// CAS keeps the hot path (the worker observing watermarks) lock-free and
/// lets resolved-ts reads stay wait-free.
#[derive(Debug)]
pub(crate) struct StatefulRts {
    unflushed: AtomicU64,
    flushed: AtomicU64,
}

impl StatefulRts {
    fn new(start_ts: Ts) -> Self {
        Self {
            unflushed: AtomicU64::new(start_ts),
            flushed: AtomicU64::new(start_ts),
        }
    }

    pub(crate) fn unflushed(&self) -> Ts {
        self.unflushed.load(Ordering::Acquire)
    }

    pub(crate) fn flushed(&self) -> Ts {
        self.flushed.load(Ordering::Acquire)
    }

    /// Advances `unflushed` to `ts` if it is greater than the current value.
    /// Returns whether the value changed.
    pub(crate) fn check_and_set_unflushed(&self, ts: Ts) -> bool {
        let mut current = self.unflushed.load(Ordering::Acquire);
        loop {
            if current >= ts {
                return false;
            }
            match self.unflushed.compare_exchange_weak(
                current,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Stores `ts` into `flushed`. The flush protocol guarantees `ts` is
    /// taken from a snapshot no older than the current flushed value.
    pub(crate) fn set_flushed(&self, ts: Ts) {
        self.flushed.store(ts, Ordering::Release);
    }
}

/// Concurrent map from table ID to its resolved-timestamp cell.
#[derive(Debug, Default)]
pub(crate) struct ResolvedTsRegistry {
    cells: RwLock<HashMap<TableId, Arc<StatefulRts>>>,
}

impl ResolvedTsRegistry {
    /// Registers a table with both timestamps at `start_ts`. A duplicate add
    /// leaves the existing cell untouched.
    pub(crate) fn add(&self, table_id: TableId, start_ts: Ts) {
        let mut cells = self.cells.write();
        if cells.contains_key(&table_id) {
            warn!(table_id, "add duplicated table in redo manager");
            return;
        }
        cells.insert(table_id, Arc::new(StatefulRts::new(start_ts)));
    }

    /// Drops a table's cell. Watermarks still in flight for it are ignored
    /// from now on.
    pub(crate) fn remove(&self, table_id: TableId) {
        if self.cells.write().remove(&table_id).is_none() {
            warn!(table_id, "remove a table not maintained in redo manager");
        }
    }

    /// Advances a table's unflushed timestamp. Silently drops updates for
    /// unknown tables; the table may have been removed while the message was
    /// queued.
    pub(crate) fn observe(&self, table_id: TableId, ts: Ts) {
        if let Some(cell) = self.cells.read().get(&table_id) {
            cell.check_and_set_unflushed(ts);
        }
    }

    /// Snapshot of `max(unflushed, flushed)` for every live table — the
    /// promotion intent of the next flush.
    pub(crate) fn snapshot(&self) -> HashMap<TableId, Ts> {
        self.cells
            .read()
            .iter()
            .map(|(table_id, cell)| (*table_id, cell.unflushed().max(cell.flushed())))
            .collect()
    }

    /// Promotes a snapshot into the flushed slots, skipping tables removed
    /// since the snapshot was taken.
    pub(crate) fn promote(&self, snapshot: &HashMap<TableId, Ts>) {
        let cells = self.cells.read();
        for (table_id, ts) in snapshot {
            if let Some(cell) = cells.get(table_id) {
                cell.set_flushed(*ts);
            }
        }
    }

    /// Flushed resolved timestamp of a table, or `None` if it is unknown.
    pub(crate) fn read(&self, table_id: TableId) -> Option<Ts> {
        self.cells.read().get(&table_id).map(|cell| cell.flushed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unflushed_is_monotonic_max() {
        let rts = StatefulRts::new(100);
        assert!(rts.check_and_set_unflushed(250));
        assert_eq!(rts.unflushed(), 250);

        // Regressions and duplicates are no-ops.
        assert!(!rts.check_and_set_unflushed(200));
        assert!(!rts.check_and_set_unflushed(250));
        assert_eq!(rts.unflushed(), 250);
        assert_eq!(rts.flushed(), 100);
    }

    #[test]
    fn duplicate_add_keeps_existing_cell() {
        let registry = ResolvedTsRegistry::default();
        registry.add(7, 100);
        registry.observe(7, 250);
        registry.add(7, 0);
        assert_eq!(registry.snapshot()[&7], 250);
    }

    #[test]
    fn snapshot_takes_max_of_both_slots() {
        let registry = ResolvedTsRegistry::default();
        registry.add(1, 100);
        registry.add(2, 300);
        registry.observe(1, 200);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[&1], 200);
        assert_eq!(snapshot[&2], 300);
    }

    #[test]
    fn promote_skips_tables_removed_after_snapshot() {
        let registry = ResolvedTsRegistry::default();
        registry.add(1, 0);
        registry.add(2, 0);
        registry.observe(1, 10);
        registry.observe(2, 20);

        let snapshot = registry.snapshot();
        registry.remove(2);
        registry.promote(&snapshot);

        assert_eq!(registry.read(1), Some(10));
        assert_eq!(registry.read(2), None);
    }

    #[test]
    fn observe_unknown_table_is_silent() {
        let registry = ResolvedTsRegistry::default();
        registry.observe(42, 10);
        assert_eq!(registry.read(42), None);
    }

    #[test]
    fn flushed_never_exceeds_unflushed_through_flush_cycle() {
        let registry = ResolvedTsRegistry::default();
        registry.add(1, 0);
        registry.observe(1, 50);

        let snapshot = registry.snapshot();
        // A watermark observed after the snapshot is not promoted by it.
        registry.observe(1, 80);
        registry.promote(&snapshot);

        assert_eq!(registry.read(1), Some(50));
    }
}
