//! SQLite storage layer for hoist.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Audit events for job and file-task history
//!
//! # Submodules
//!
//! - [`entities`] - Target entity store (entities, connections, dictionaries)
//! - [`events`] - Audit event storage
//! - [`queue`] - Durable work queue for the scheduler
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod entities;
pub mod events;
pub mod queue;
pub mod schema;
pub mod sqlite;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{FailedImportRecord, FileTask};

pub use entities::{Entity, EntityRef};
pub use queue::{QueueKind, QueueOutcome, QueuedWork};
pub use sqlite::{FileTaskSummary, MutationContext, SqliteStorage};

/// Persistence used by the progress tracker.
///
/// `save_progress` must never move a task out of FINISHED or FAILED.
pub trait ProgressStore: Send + Sync {
    /// Persist the task's counters, state and message.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save_progress(&self, task: &FileTask) -> Result<()>;

    /// Persist one failed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn record_failure(&self, failure: &FailedImportRecord) -> Result<()>;
}

/// The entity-manager capability imports write into.
///
/// Every call is scoped to one application. Implementations enforce their
/// own consistency; the import pipeline only relies on entity creation
/// being repeatable for the same uuid and type.
pub trait EntityStore: Send + Sync {
    /// Create (or overwrite the properties of) an entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityWrite` if the store rejects the entity.
    fn create_entity(&self, application_id: Uuid, entity: &Entity) -> Result<()>;

    /// Look up an entity by uuid.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_entity(&self, application_id: Uuid, uuid: Uuid) -> Result<Option<Entity>>;

    /// Create a named edge from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns `EntityWrite` if either endpoint is missing.
    fn create_connection(
        &self,
        application_id: Uuid,
        source: &EntityRef,
        relation: &str,
        target: Uuid,
    ) -> Result<()>;

    /// Merge `entries` into the named dictionary of `owner`.
    ///
    /// # Errors
    ///
    /// Returns `EntityWrite` if the owner is missing.
    fn merge_dictionary(
        &self,
        application_id: Uuid,
        owner: Uuid,
        name: &str,
        entries: &Map<String, Value>,
    ) -> Result<()>;

    /// All entities of one type, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_entities(&self, application_id: Uuid, entity_type: &str) -> Result<Vec<Entity>>;

    /// Outgoing edges of `source` as `(relation, target)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn connections_from(&self, application_id: Uuid, source: Uuid) -> Result<Vec<(String, Uuid)>>;

    /// Dictionaries owned by `owner` as `(name, entries)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn dictionaries_of(
        &self,
        application_id: Uuid,
        owner: Uuid,
    ) -> Result<Vec<(String, Map<String, Value>)>>;
}
