//! The bulk import pipeline.
//!
//! - [`naming`] - blob name convention for import files
//! - [`parser`] - streaming two-pass parser producing [`WriteEvent`]s
//! - [`executor`] - applies write events on a bounded worker pool
//! - [`tracker`] - per-file counters and batched progress flushes
//! - [`coordinator`] - job and file-task state machine
//! - [`export`] - writes a collection back out in the import format

pub mod coordinator;
pub mod event;
pub mod executor;
pub mod export;
pub mod naming;
pub mod parser;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{ImportCoordinator, INVALID_ID, NULL_ID};
pub use event::{Heartbeat, ParseMode, WriteEvent};
pub use executor::{PassStats, WriteEventExecutor};
pub use export::{CollectionExporter, ExportSummary};
pub use naming::{FileDescriptor, FileNameCodec};
pub use parser::{EntityParser, EventStream};
pub use tracker::ProgressTracker;
