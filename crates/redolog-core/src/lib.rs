//! # Redolog Core
//!
//! Shared model types and the log-writer layer for the redo log: the event
//! shapes persisted to the log, the [`writer::RedoLogWriter`] capability
//! consumed by the manager, and the concrete backends (in-memory and
//! object-store) selected from a storage URI.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod error;
pub mod model;
pub mod writer;

pub use error::WriterError;
