//! # Redolog Manager
//!
//! The redo-log manager of a change-data-capture pipeline. Upstream
//! producers hand it row-change events, DDL events, and per-table resolved
//! timestamps; it persists the events through a
//! [`RedoLogWriter`](redolog_core::writer::RedoLogWriter) and tracks, per
//! table, the greatest resolved timestamp whose events are known to be
//! durably flushed. Downstream sinks use that flushed timestamp as their
//! safe commit point.
//!
//! ## Architecture
//!
//! Producers call the [`DmlManager`] / [`DdlManager`] facades, which enqueue
//! messages onto an unbounded channel. A single background worker
//! ([`DmlManager::run`]) drains the channel, routing event batches to the
//! writer and resolved timestamps to the in-memory watermark registry. A
//! periodic flush tick snapshots the registry, forces the writer out to
//! durable storage, and only then promotes the snapshot into the per-table
//! flushed timestamps — so a table's flushed watermark can never pass an
//! event that is not yet on disk.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
mod rts;

pub use config::{ConsistentConfig, ConsistentLevel};
pub use error::RedoError;
pub use manager::{DdlManager, DmlManager, ReleaseMemoryCallback};
