//! File task and failure record models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobState;
use crate::error::{Error, Result};

/// One source file being imported as part of an [`super::ImportJob`].
///
/// Counters reflect work durably completed; a tracker rebuilt from this
/// record continues counting from these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTask {
    pub id: Uuid,
    pub job_id: Uuid,
    pub file_name: String,
    pub application_id: Uuid,
    pub collection: String,
    pub state: JobState,
    pub entities_imported: u64,
    pub entities_failed: u64,
    pub connections_imported: u64,
    pub connections_failed: u64,
    pub error_message: Option<String>,
    pub attempts: u32,
    /// Unix milliseconds.
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub updated_at: i64,
}

impl FileTask {
    /// Create a new file task in the CREATED state.
    #[must_use]
    pub fn new(job_id: Uuid, file_name: &str, application_id: Uuid, collection: &str) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            job_id,
            file_name: file_name.to_string(),
            application_id,
            collection: collection.to_string(),
            state: JobState::Created,
            entities_imported: 0,
            entities_failed: 0,
            connections_imported: 0,
            connections_failed: 0,
            error_message: None,
            attempts: 0,
            created_at: now,
            started_at: None,
            updated_at: now,
        }
    }

    /// Entity records already attempted (written or failed).
    #[must_use]
    pub const fn total_entities(&self) -> u64 {
        self.entities_imported + self.entities_failed
    }

    /// Connection records already attempted (written or failed).
    #[must_use]
    pub const fn total_connections(&self) -> u64 {
        self.connections_imported + self.connections_failed
    }
}

/// Which pass a failed record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Entity,
    Connection,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Connection => "connection",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "entity" => Ok(Self::Entity),
            "connection" => Ok(Self::Connection),
            other => Err(Error::InvalidArgument(format!("unknown failure kind: {other}"))),
        }
    }
}

/// A single record that could not be written. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedImportRecord {
    pub id: Uuid,
    pub file_task_id: Uuid,
    pub kind: FailureKind,
    pub message: String,
    pub created_at: i64,
}

impl FailedImportRecord {
    #[must_use]
    pub fn new(file_task_id: Uuid, kind: FailureKind, message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_task_id,
            kind,
            message: message.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
