//! Database schema definitions.
//!
//! One SQLite database holds the import bookkeeping (jobs, file tasks,
//! failures, the work queue, audit events), the tenant directory and the
//! target entity store.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the hoist database.
///
/// Note: Timestamps are stored as INTEGER (Unix milliseconds). Identifiers
/// are UUIDs stored as TEXT.
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Tenant Directory
-- ====================

CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS applications (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE CASCADE,
    UNIQUE(organization_id, name)
);

CREATE INDEX IF NOT EXISTS idx_applications_org ON applications(organization_id);

-- ====================
-- Import Bookkeeping
-- ====================

CREATE TABLE IF NOT EXISTS import_jobs (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    application_id TEXT,
    collection TEXT,
    storage_provider TEXT NOT NULL,
    storage_info TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'CREATED'
        CHECK (state IN ('CREATED', 'SCHEDULED', 'STARTED', 'FINISHED', 'FAILED')),
    error_message TEXT,
    file_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    finished_at INTEGER,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_import_jobs_state ON import_jobs(state);
CREATE INDEX IF NOT EXISTS idx_import_jobs_created ON import_jobs(created_at DESC);

-- File tasks: job_id is the job -> file "includes" link
CREATE TABLE IF NOT EXISTS file_tasks (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    application_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'CREATED'
        CHECK (state IN ('CREATED', 'SCHEDULED', 'STARTED', 'FINISHED', 'FAILED')),
    entities_imported INTEGER NOT NULL DEFAULT 0,
    entities_failed INTEGER NOT NULL DEFAULT 0,
    connections_imported INTEGER NOT NULL DEFAULT 0,
    connections_failed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (job_id) REFERENCES import_jobs(id) ON DELETE CASCADE,
    UNIQUE(job_id, file_name)
);

CREATE INDEX IF NOT EXISTS idx_file_tasks_job ON file_tasks(job_id);
CREATE INDEX IF NOT EXISTS idx_file_tasks_job_state ON file_tasks(job_id, state);

-- Failed records: file_task_id is the file -> failure "errors" link
CREATE TABLE IF NOT EXISTS failed_imports (
    id TEXT PRIMARY KEY,
    file_task_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('entity', 'connection')),
    message TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (file_task_id) REFERENCES file_tasks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_failed_imports_task ON failed_imports(file_task_id, created_at);

-- Durable work queue (at-least-once delivery)
CREATE TABLE IF NOT EXISTS job_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('import_job', 'file_import')),
    target_id TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending'
        CHECK (state IN ('pending', 'running', 'done', 'dead')),
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    run_after INTEGER NOT NULL,
    heartbeat_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_queue_ready ON job_queue(state, run_after);

-- ====================
-- Target Entity Store
-- ====================

CREATE TABLE IF NOT EXISTS entities (
    application_id TEXT NOT NULL,
    uuid TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    PRIMARY KEY (application_id, uuid)
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(application_id, entity_type, created_at);

CREATE TABLE IF NOT EXISTS connections (
    application_id TEXT NOT NULL,
    source TEXT NOT NULL,
    source_type TEXT NOT NULL,
    relation TEXT NOT NULL,
    target TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (application_id, source, relation, target)
);

CREATE INDEX IF NOT EXISTS idx_connections_target ON connections(application_id, target);

CREATE TABLE IF NOT EXISTS dictionaries (
    application_id TEXT NOT NULL,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    entries TEXT NOT NULL DEFAULT '{}',
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (application_id, owner, name)
);

-- ====================
-- Audit Events
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);
"#;

/// Apply the schema to the database.
///
/// This uses `execute_batch` to run the entire DDL script.
/// It is idempotent because all statements use `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // Set pragmas before schema creation
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
