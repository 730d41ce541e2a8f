//! SQLite storage implementation.
//!
//! This module provides the main storage backend for hoist using SQLite.
//! It follows the MutationContext pattern for transaction discipline and audit logging.
//!
//! The connection sits behind a mutex so one `SqliteStorage` can be shared
//! by the write-worker pool; every call holds the lock for one statement or
//! one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Application, FailedImportRecord, FileTask, ImportJob, ImportScope, JobState, Organization,
    StorageInfo,
};
use crate::storage::events::{get_events, insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use crate::storage::ProgressStore;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

/// Context for a mutation operation, tracking side effects.
///
/// This struct is passed to mutation closures to record audit events,
/// which are written inside the same transaction as the mutation.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation (scheduler, CLI user, etc.).
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record a state transition, with an optional explanatory comment.
    pub fn record_transition(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        from: JobState,
        to: JobState,
        comment: Option<&str>,
    ) {
        let mut event = Event::new(entity_type, entity_id, event_type, &self.actor)
            .with_values(Some(from.to_string()), Some(to.to_string()));
        if let Some(comment) = comment {
            event = event.with_comment(comment);
        }
        self.events.push(event);
    }
}

/// Summary counts of the file tasks belonging to one job.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FileTaskSummary {
    pub total: usize,
    pub pending: usize,
    pub finished: usize,
    pub failed: usize,
}

impl FileTaskSummary {
    /// True once every task has reached FINISHED or FAILED.
    #[must_use]
    pub const fn all_terminal(&self) -> bool {
        self.pending == 0
    }
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the underlying connection.
    ///
    /// A panic on another thread while holding the lock leaves the
    /// connection usable (SQLite rolls back the open transaction), so a
    /// poisoned lock is recovered rather than propagated.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        Ok(result)
    }

    // ==================
    // Tenant Operations
    // ==================

    /// Register an organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. the name is taken).
    pub fn create_organization(&self, org: &Organization, actor: &str) -> Result<()> {
        self.mutate("create_organization", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![org.id.to_string(), org.name, org.created_at],
            )?;
            ctx.record_event("organization", &org.id.to_string(), EventType::OrganizationCreated);
            Ok(())
        })
    }

    /// Get an organization by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        let conn = self.conn();
        let org = conn
            .query_row(
                "SELECT id, name, created_at FROM organizations WHERE id = ?1",
                [id.to_string()],
                map_organization,
            )
            .optional()?;
        Ok(org)
    }

    /// List organizations by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_organizations(&self) -> Result<Vec<Organization>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM organizations ORDER BY name")?;
        let rows = stmt.query_map([], map_organization)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Register an application under an existing organization.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` if the owner does not exist, or an
    /// error if the insert fails.
    pub fn create_application(&self, app: &Application, actor: &str) -> Result<()> {
        self.mutate("create_application", actor, |tx, ctx| {
            let org_exists = tx
                .prepare("SELECT 1 FROM organizations WHERE id = ?1")?
                .exists([app.organization_id.to_string()])?;
            if !org_exists {
                return Err(Error::OrganizationNotFound {
                    id: app.organization_id.to_string(),
                });
            }
            tx.execute(
                "INSERT INTO applications (id, organization_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    app.id.to_string(),
                    app.organization_id.to_string(),
                    app.name,
                    app.created_at
                ],
            )?;
            ctx.record_event("application", &app.id.to_string(), EventType::ApplicationCreated);
            Ok(())
        })
    }

    /// Get an application by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_application(&self, id: Uuid) -> Result<Option<Application>> {
        let conn = self.conn();
        let app = conn
            .query_row(
                "SELECT id, organization_id, name, created_at FROM applications WHERE id = ?1",
                [id.to_string()],
                map_application,
            )
            .optional()?;
        Ok(app)
    }

    /// List the applications of one organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_applications(&self, organization_id: Uuid) -> Result<Vec<Application>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, organization_id, name, created_at FROM applications
             WHERE organization_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map([organization_id.to_string()], map_application)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ==================
    // Import Jobs
    // ==================

    /// Persist a new import job.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_job(&self, job: &ImportJob, actor: &str) -> Result<()> {
        let storage_info = serde_json::to_string(&job.storage_info)?;
        self.mutate("create_job", actor, |tx, ctx| {
            tx.execute(
                "INSERT INTO import_jobs (id, organization_id, application_id, collection,
                    storage_provider, storage_info, state, error_message, file_count,
                    created_at, started_at, finished_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    job.id.to_string(),
                    job.scope.organization_id.to_string(),
                    job.scope.application_id.map(|id| id.to_string()),
                    job.scope.collection,
                    job.storage_provider,
                    storage_info,
                    job.state.as_str(),
                    job.error_message,
                    job.file_count,
                    job.created_at,
                    job.started_at,
                    job.finished_at,
                    job.updated_at,
                ],
            )?;
            ctx.record_event("import_job", &job.id.to_string(), EventType::JobCreated);
            Ok(())
        })
    }

    /// Get an import job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_job(&self, id: Uuid) -> Result<Option<ImportJob>> {
        let conn = self.conn();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = ?1"),
                [id.to_string()],
                map_job,
            )
            .optional()?;
        Ok(job)
    }

    /// List the most recent import jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_jobs(&self, limit: u32) -> Result<Vec<ImportJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], map_job)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Move a job to a new state.
    ///
    /// A job already in FINISHED or FAILED is left untouched and `false` is
    /// returned. `message`, when given, replaces the stored error message.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if the job does not exist, or a database error.
    pub fn transition_job(
        &self,
        id: Uuid,
        to: JobState,
        message: Option<&str>,
        actor: &str,
    ) -> Result<bool> {
        let id_str = id.to_string();
        self.mutate("transition_job", actor, |tx, ctx| {
            let current: Option<String> = tx
                .query_row("SELECT state FROM import_jobs WHERE id = ?1", [&id_str], |row| {
                    row.get(0)
                })
                .optional()?;
            let current: JobState = current
                .ok_or_else(|| Error::JobNotFound { id: id_str.clone() })?
                .parse()?;
            if current.is_terminal() {
                debug!(job_id = %id, state = %current, "Ignoring transition of terminal job");
                return Ok(false);
            }

            let now = chrono::Utc::now().timestamp_millis();
            tx.execute(
                "UPDATE import_jobs SET
                    state = ?2,
                    error_message = COALESCE(?3, error_message),
                    started_at = CASE WHEN ?2 = 'STARTED' AND started_at IS NULL THEN ?4 ELSE started_at END,
                    finished_at = CASE WHEN ?2 IN ('FINISHED', 'FAILED') THEN ?4 ELSE finished_at END,
                    updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id_str, to.as_str(), message, now],
            )?;
            ctx.record_transition(
                "import_job",
                &id_str,
                EventType::JobStateChanged,
                current,
                to,
                message,
            );
            Ok(true)
        })
    }

    /// Audit trail of a job, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn job_history(&self, id: Uuid, limit: Option<u32>) -> Result<Vec<Event>> {
        let conn = self.conn();
        Ok(get_events(&conn, "import_job", &id.to_string(), limit)?)
    }

    // ==================
    // File Tasks
    // ==================

    /// Persist a new file task linked to its job.
    ///
    /// Returns `false` without writing if the job already has a task for
    /// the same file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_file_task(&self, task: &FileTask, actor: &str) -> Result<bool> {
        self.mutate("create_file_task", actor, |tx, ctx| insert_file_task(tx, ctx, task))
    }

    /// Record the discovered file count of a job and create all of its file
    /// tasks in one transaction.
    ///
    /// Tasks whose file name the job already has are skipped. Returns the
    /// number of tasks inserted.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound`, or an error if an insert fails.
    pub fn create_file_tasks(
        &self,
        job_id: Uuid,
        tasks: &[FileTask],
        actor: &str,
    ) -> Result<usize> {
        let id_str = job_id.to_string();
        self.mutate("create_file_tasks", actor, |tx, ctx| {
            let updated = tx.execute(
                "UPDATE import_jobs SET file_count = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![
                    id_str,
                    tasks.len() as u64,
                    chrono::Utc::now().timestamp_millis()
                ],
            )?;
            if updated == 0 {
                return Err(Error::JobNotFound { id: id_str.clone() });
            }
            let mut inserted = 0;
            for task in tasks {
                if insert_file_task(tx, ctx, task)? {
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }

    /// Get a file task by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_file_task(&self, id: Uuid) -> Result<Option<FileTask>> {
        let conn = self.conn();
        let task = conn
            .query_row(
                &format!("SELECT {FILE_TASK_COLUMNS} FROM file_tasks WHERE id = ?1"),
                [id.to_string()],
                map_file_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Get a job's file task by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_file_task(&self, job_id: Uuid, file_name: &str) -> Result<Option<FileTask>> {
        let conn = self.conn();
        let task = conn
            .query_row(
                &format!(
                    "SELECT {FILE_TASK_COLUMNS} FROM file_tasks WHERE job_id = ?1 AND file_name = ?2"
                ),
                rusqlite::params![job_id.to_string(), file_name],
                map_file_task,
            )
            .optional()?;
        Ok(task)
    }

    /// List every file task of a job, in file-name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_file_tasks(&self, job_id: Uuid) -> Result<Vec<FileTask>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_TASK_COLUMNS} FROM file_tasks WHERE job_id = ?1 ORDER BY file_name"
        ))?;
        let rows = stmt.query_map([job_id.to_string()], map_file_task)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Count a job's file tasks by state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn summarize_file_tasks(&self, job_id: Uuid) -> Result<FileTaskSummary> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM file_tasks WHERE job_id = ?1 GROUP BY state")?;
        let rows = stmt.query_map([job_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;

        let mut summary = FileTaskSummary::default();
        for row in rows {
            let (state, count) = row?;
            summary.total += count;
            match state.parse::<JobState>()? {
                JobState::Finished => summary.finished += count,
                JobState::Failed => summary.failed += count,
                JobState::Created | JobState::Scheduled | JobState::Started => {
                    summary.pending += count;
                }
            }
        }
        Ok(summary)
    }

    /// Move a file task to a new state.
    ///
    /// Terminal tasks are left untouched and `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns `FileTaskNotFound` if the task does not exist, or a database error.
    pub fn transition_file_task(
        &self,
        id: Uuid,
        to: JobState,
        message: Option<&str>,
        actor: &str,
    ) -> Result<bool> {
        let id_str = id.to_string();
        self.mutate("transition_file_task", actor, |tx, ctx| {
            let Some(current) = file_task_state(tx, &id_str)? else {
                return Err(Error::FileTaskNotFound { id: id_str.clone() });
            };
            if current.is_terminal() {
                debug!(file_task_id = %id, state = %current, "Ignoring transition of terminal file task");
                return Ok(false);
            }

            let now = chrono::Utc::now().timestamp_millis();
            tx.execute(
                "UPDATE file_tasks SET
                    state = ?2,
                    error_message = COALESCE(?3, error_message),
                    started_at = CASE WHEN ?2 = 'STARTED' AND started_at IS NULL THEN ?4 ELSE started_at END,
                    updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id_str, to.as_str(), message, now],
            )?;
            ctx.record_transition(
                "file_task",
                &id_str,
                EventType::FileTaskStateChanged,
                current,
                to,
                message,
            );
            Ok(true)
        })
    }

    /// Count one more delivery of a file task and return the new total.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn increment_file_task_attempts(&self, id: Uuid) -> Result<u32> {
        let conn = self.conn();
        let attempts = conn
            .query_row(
                "UPDATE file_tasks SET attempts = attempts + 1, updated_at = ?2
                 WHERE id = ?1 RETURNING attempts",
                rusqlite::params![id.to_string(), chrono::Utc::now().timestamp_millis()],
                |row| row.get(0),
            )
            .optional()?;
        attempts.ok_or_else(|| Error::FileTaskNotFound { id: id.to_string() })
    }

    /// Force a file task and its job to FAILED.
    ///
    /// Used when the scheduler gives up on a file; bypasses aggregation.
    ///
    /// # Errors
    ///
    /// Returns `FileTaskNotFound` if the task does not exist, or a database error.
    pub fn dead_letter_file_task(&self, id: Uuid, message: &str, actor: &str) -> Result<()> {
        let id_str = id.to_string();
        self.mutate("dead_letter_file_task", actor, |tx, ctx| {
            let job_id: Option<String> = tx
                .query_row("SELECT job_id FROM file_tasks WHERE id = ?1", [&id_str], |row| {
                    row.get(0)
                })
                .optional()?;
            let job_id = job_id.ok_or_else(|| Error::FileTaskNotFound { id: id_str.clone() })?;
            let now = chrono::Utc::now().timestamp_millis();

            let tasks = tx.execute(
                "UPDATE file_tasks SET state = 'FAILED', error_message = ?2, updated_at = ?3
                 WHERE id = ?1 AND state NOT IN ('FINISHED', 'FAILED')",
                rusqlite::params![id_str, message, now],
            )?;
            if tasks > 0 {
                ctx.record_event("file_task", &id_str, EventType::FileTaskDeadLettered);
            }

            let jobs = tx.execute(
                "UPDATE import_jobs SET state = 'FAILED', error_message = ?2, finished_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND state NOT IN ('FINISHED', 'FAILED')",
                rusqlite::params![job_id, message, now],
            )?;
            if jobs > 0 {
                ctx.record_event("import_job", &job_id, EventType::JobDeadLettered);
            }
            Ok(())
        })
    }

    /// List the failures recorded against a file task, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_failed_imports(&self, file_task_id: Uuid) -> Result<Vec<FailedImportRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, file_task_id, kind, message, created_at FROM failed_imports
             WHERE file_task_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([file_task_id.to_string()], |row| {
            let kind: String = row.get(2)?;
            Ok(FailedImportRecord {
                id: uuid_at(row, 0)?,
                file_task_id: uuid_at(row, 1)?,
                kind: kind.parse().map_err(|e: Error| conversion_error(2, e))?,
                message: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

impl ProgressStore for SqliteStorage {
    fn save_progress(&self, task: &FileTask) -> Result<()> {
        let id_str = task.id.to_string();
        self.mutate("save_progress", "tracker", |tx, ctx| {
            let Some(current) = file_task_state(tx, &id_str)? else {
                return Err(Error::FileTaskNotFound { id: id_str.clone() });
            };
            if current.is_terminal() {
                return Ok(());
            }
            tx.execute(
                "UPDATE file_tasks SET
                    entities_imported = ?2, entities_failed = ?3,
                    connections_imported = ?4, connections_failed = ?5,
                    error_message = ?6, state = ?7, updated_at = ?8
                 WHERE id = ?1",
                rusqlite::params![
                    id_str,
                    task.entities_imported,
                    task.entities_failed,
                    task.connections_imported,
                    task.connections_failed,
                    task.error_message,
                    task.state.as_str(),
                    chrono::Utc::now().timestamp_millis(),
                ],
            )?;
            if current != task.state {
                ctx.record_transition(
                    "file_task",
                    &id_str,
                    EventType::FileTaskStateChanged,
                    current,
                    task.state,
                    task.error_message.as_deref(),
                );
            }
            Ok(())
        })
    }

    fn record_failure(&self, failure: &FailedImportRecord) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO failed_imports (id, file_task_id, kind, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                failure.id.to_string(),
                failure.file_task_id.to_string(),
                failure.kind.as_str(),
                failure.message,
                failure.created_at,
            ],
        )?;
        Ok(())
    }
}

// ==================
// Row mapping
// ==================

const JOB_COLUMNS: &str = "id, organization_id, application_id, collection, storage_provider, \
    storage_info, state, error_message, file_count, created_at, started_at, finished_at, updated_at";

const FILE_TASK_COLUMNS: &str = "id, job_id, file_name, application_id, collection, state, \
    entities_imported, entities_failed, connections_imported, connections_failed, error_message, \
    attempts, created_at, started_at, updated_at";

fn insert_file_task(tx: &Transaction, ctx: &mut MutationContext, task: &FileTask) -> Result<bool> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO file_tasks (id, job_id, file_name, application_id, collection,
            state, entities_imported, entities_failed, connections_imported, connections_failed,
            error_message, attempts, created_at, started_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        rusqlite::params![
            task.id.to_string(),
            task.job_id.to_string(),
            task.file_name,
            task.application_id.to_string(),
            task.collection,
            task.state.as_str(),
            task.entities_imported,
            task.entities_failed,
            task.connections_imported,
            task.connections_failed,
            task.error_message,
            task.attempts,
            task.created_at,
            task.started_at,
            task.updated_at,
        ],
    )?;
    if inserted > 0 {
        ctx.record_event("file_task", &task.id.to_string(), EventType::FileTaskCreated);
    }
    Ok(inserted > 0)
}

fn file_task_state(tx: &Transaction, id: &str) -> Result<Option<JobState>> {
    let state: Option<String> = tx
        .query_row("SELECT state FROM file_tasks WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    state.map(|s| s.parse()).transpose()
}

pub(crate) fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a TEXT column holding a UUID.
pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn state_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<JobState> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: Error| conversion_error(idx, e))
}

fn map_organization(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn map_application(row: &Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        id: uuid_at(row, 0)?,
        organization_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<ImportJob> {
    let storage_info: String = row.get(5)?;
    let storage_info: StorageInfo =
        serde_json::from_str(&storage_info).map_err(|e| conversion_error(5, e))?;
    Ok(ImportJob {
        id: uuid_at(row, 0)?,
        scope: ImportScope {
            organization_id: uuid_at(row, 1)?,
            application_id: opt_uuid_at(row, 2)?,
            collection: row.get(3)?,
        },
        storage_provider: row.get(4)?,
        storage_info,
        state: state_at(row, 6)?,
        error_message: row.get(7)?,
        file_count: row.get(8)?,
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn map_file_task(row: &Row<'_>) -> rusqlite::Result<FileTask> {
    Ok(FileTask {
        id: uuid_at(row, 0)?,
        job_id: uuid_at(row, 1)?,
        file_name: row.get(2)?,
        application_id: uuid_at(row, 3)?,
        collection: row.get(4)?,
        state: state_at(row, 5)?,
        entities_imported: row.get(6)?,
        entities_failed: row.get(7)?,
        connections_imported: row.get(8)?,
        connections_failed: row.get(9)?,
        error_message: row.get(10)?,
        attempts: row.get(11)?,
        created_at: row.get(12)?,
        started_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}
