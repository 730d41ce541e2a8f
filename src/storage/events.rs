//! Audit event storage and retrieval.
//!
//! Every job and file-task state transition writes an event so a finished
//! import can be reconstructed after the fact.

use rusqlite::{Connection, Result};

/// Event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    // Tenant events
    OrganizationCreated,
    ApplicationCreated,

    // Import job events
    JobCreated,
    JobStateChanged,
    JobDeadLettered,

    // File task events
    FileTaskCreated,
    FileTaskStateChanged,
    FileTaskDeadLettered,

    // Export events
    CollectionExported,
}

impl EventType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrganizationCreated => "organization_created",
            Self::ApplicationCreated => "application_created",
            Self::JobCreated => "job_created",
            Self::JobStateChanged => "job_state_changed",
            Self::JobDeadLettered => "job_dead_lettered",
            Self::FileTaskCreated => "file_task_created",
            Self::FileTaskStateChanged => "file_task_state_changed",
            Self::FileTaskDeadLettered => "file_task_dead_lettered",
            Self::CollectionExported => "collection_exported",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "organization_created" => Self::OrganizationCreated,
            "application_created" => Self::ApplicationCreated,
            "job_created" => Self::JobCreated,
            "job_state_changed" => Self::JobStateChanged,
            "job_dead_lettered" => Self::JobDeadLettered,
            "file_task_created" => Self::FileTaskCreated,
            "file_task_state_changed" => Self::FileTaskStateChanged,
            "file_task_dead_lettered" => Self::FileTaskDeadLettered,
            "collection_exported" => Self::CollectionExported,
            _ => return None,
        })
    }
}

/// An audit event record.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: EventType,
    pub actor: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub created_at: i64,
}

impl Event {
    /// Create a new event (id will be assigned by database).
    #[must_use]
    pub fn new(entity_type: &str, entity_id: &str, event_type: EventType, actor: &str) -> Self {
        Self {
            id: 0,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            event_type,
            actor: actor.to_string(),
            old_value: None,
            new_value: None,
            comment: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Add old/new values for field change tracking.
    #[must_use]
    pub fn with_values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    /// Add a comment to the event.
    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}

/// Insert an event into the database.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(conn: &Connection, event: &Event) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (entity_type, entity_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            event.entity_type,
            event.entity_id,
            event.event_type.as_str(),
            event.actor,
            event.old_value,
            event.new_value,
            event.comment,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Get events for an entity, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_events(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
    limit: Option<u32>,
) -> Result<Vec<Event>> {
    let limit = limit.unwrap_or(100);
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, event_type, actor, old_value, new_value, comment, created_at
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC
         LIMIT ?3",
    )?;

    let rows = stmt.query_map(rusqlite::params![entity_type, entity_id, limit], |row| {
        let raw: String = row.get(3)?;
        let event_type = EventType::parse(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown event type: {raw}").into(),
            )
        })?;
        Ok(Event {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            event_type,
            actor: row.get(4)?,
            old_value: row.get(5)?,
            new_value: row.get(6)?,
            comment: row.get(7)?,
            created_at: row.get(8)?,
        })
    })?;

    rows.collect()
}
