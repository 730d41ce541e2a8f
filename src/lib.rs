//! hoist - bulk import of JSON collections from blob storage
//!
//! This crate provides the core functionality for the `hoist` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (ImportJob, FileTask, Organization, Application)
//! - [`storage`] - SQLite database layer, work queue and entity store
//! - [`blob`] - Blob store backends (S3, local directory) and file discovery
//! - [`import`] - File naming, parsing, progress tracking and the write pipeline
//! - [`scheduler`] - Drains the work queue with retries
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod import;
pub mod model;
pub mod scheduler;
pub mod storage;

pub use error::{Error, Result};

/// Global silent mode flag for `--silent` output.
///
/// When set, create commands print only the ID instead of full output.
pub static SILENT: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Check if silent mode is active.
#[inline]
pub fn is_silent() -> bool {
    SILENT.load(std::sync::atomic::Ordering::Relaxed)
}
