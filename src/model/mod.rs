//! Data models for hoist.
//!
//! This module contains the import domain models:
//! - ImportJob, JobState, ImportScope, ImportRequest
//! - FileTask, FailedImportRecord
//! - Organization, Application

pub mod file_task;
pub mod job;
pub mod tenant;

pub use file_task::{FailedImportRecord, FailureKind, FileTask};
pub use job::{ImportJob, ImportRequest, ImportScope, JobState, ScopeKind, StorageInfo};
pub use tenant::{Application, Organization};
