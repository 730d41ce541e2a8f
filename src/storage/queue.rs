//! Durable work queue.
//!
//! Entries are delivered at least once: a claimed entry stays `running`
//! until it is completed or failed, and a worker that dies mid-run leaves
//! a stale heartbeat that [`SqliteStorage::release_stale`] hands back out.

use rusqlite::OptionalExtension;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::sqlite::{conversion_error, uuid_at};
use crate::storage::SqliteStorage;

/// What a queue entry asks the scheduler to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Discover files and fan out file tasks for a job.
    ImportJob,
    /// Import one file task.
    FileImport,
}

impl QueueKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ImportJob => "import_job",
            Self::FileImport => "file_import",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "import_job" => Some(Self::ImportJob),
            "file_import" => Some(Self::FileImport),
            _ => None,
        }
    }
}

/// A claimed queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWork {
    pub id: i64,
    pub kind: QueueKind,
    pub target_id: Uuid,
    /// Deliveries so far, including this one.
    pub attempts: u32,
}

/// What happened to an entry after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Back to pending, not claimable before `run_after` (Unix millis).
    Retry { run_after: i64 },
    /// Out of attempts.
    Dead,
}

impl SqliteStorage {
    /// Add an entry that is immediately claimable.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn enqueue(&self, kind: QueueKind, target_id: Uuid) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO job_queue (kind, target_id, state, attempts, run_after, created_at, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3, ?3, ?3)",
            rusqlite::params![kind.as_str(), target_id.to_string(), now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(queue_id = id, kind = kind.as_str(), target = %target_id, "Enqueued work");
        Ok(id)
    }

    /// Claim the ready entry with the oldest `run_after`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim transaction fails.
    pub fn claim_next(&self) -> Result<Option<QueuedWork>> {
        self.mutate("claim_next", "scheduler", |tx, _ctx| {
            let now = chrono::Utc::now().timestamp_millis();
            let next = tx
                .query_row(
                    "SELECT id, kind, target_id, attempts FROM job_queue
                     WHERE state = 'pending' AND run_after <= ?1
                     ORDER BY run_after, id LIMIT 1",
                    [now],
                    |row| {
                        let kind: String = row.get(1)?;
                        let kind = QueueKind::parse(&kind).ok_or_else(|| {
                            conversion_error(
                                1,
                                Error::InvalidArgument(format!("unknown queue kind: {kind}")),
                            )
                        })?;
                        Ok(QueuedWork {
                            id: row.get(0)?,
                            kind,
                            target_id: uuid_at(row, 2)?,
                            attempts: row.get::<_, u32>(3)? + 1,
                        })
                    },
                )
                .optional()?;

            if let Some(work) = &next {
                tx.execute(
                    "UPDATE job_queue SET state = 'running', attempts = ?2, heartbeat_at = ?3, updated_at = ?3
                     WHERE id = ?1",
                    rusqlite::params![work.id, work.attempts, now],
                )?;
            }
            Ok(next)
        })
    }

    /// Refresh the liveness timestamp of a running entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn heartbeat(&self, id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn().execute(
            "UPDATE job_queue SET heartbeat_at = ?2, updated_at = ?2 WHERE id = ?1 AND state = 'running'",
            rusqlite::params![id, now],
        )?;
        Ok(())
    }

    /// Mark an entry done.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn complete(&self, id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn().execute(
            "UPDATE job_queue SET state = 'done', last_error = NULL, updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, now],
        )?;
        Ok(())
    }

    /// Record a failed delivery.
    ///
    /// The entry goes back to pending with `run_after = now + retry_delay_ms`
    /// unless it has used up `max_attempts`, in which case it is dead.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry does not exist or the update fails.
    pub fn fail(
        &self,
        id: i64,
        error: &str,
        max_attempts: u32,
        retry_delay_ms: i64,
    ) -> Result<QueueOutcome> {
        self.mutate("fail_queue_entry", "scheduler", |tx, _ctx| {
            let attempts: Option<u32> = tx
                .query_row("SELECT attempts FROM job_queue WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let attempts = attempts
                .ok_or_else(|| Error::Other(format!("queue entry {id} does not exist")))?;
            let now = chrono::Utc::now().timestamp_millis();

            if attempts >= max_attempts {
                tx.execute(
                    "UPDATE job_queue SET state = 'dead', last_error = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, error, now],
                )?;
                warn!(queue_id = id, attempts, "Queue entry is dead");
                return Ok(QueueOutcome::Dead);
            }

            let run_after = now + retry_delay_ms;
            tx.execute(
                "UPDATE job_queue SET state = 'pending', last_error = ?2, run_after = ?3, updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![id, error, run_after, now],
            )?;
            Ok(QueueOutcome::Retry { run_after })
        })
    }

    /// Return running entries whose heartbeat is older than `stale_after_ms`
    /// to pending. The delivery they were on still counts as an attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn release_stale(&self, stale_after_ms: i64) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let released = self.conn().execute(
            "UPDATE job_queue SET state = 'pending', run_after = ?1, updated_at = ?1
             WHERE state = 'running' AND COALESCE(heartbeat_at, 0) < ?2",
            rusqlite::params![now, now - stale_after_ms],
        )?;
        if released > 0 {
            warn!(released, "Released stale queue entries");
        }
        Ok(released)
    }

    /// Entries that still have to run (pending or running).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_outstanding(&self) -> Result<u64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM job_queue WHERE state IN ('pending', 'running')",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Earliest `run_after` among pending entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn next_run_after(&self) -> Result<Option<i64>> {
        let next = self.conn().query_row(
            "SELECT MIN(run_after) FROM job_queue WHERE state = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    /// Last recorded error of an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn queue_last_error(&self, id: i64) -> Result<Option<String>> {
        let last = self
            .conn()
            .query_row("SELECT last_error FROM job_queue WHERE id = ?1", [id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(last.flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_marks_running() {
        let storage = SqliteStorage::open_memory().unwrap();
        let target = Uuid::new_v4();
        let id = storage.enqueue(QueueKind::FileImport, target).unwrap();

        let work = storage.claim_next().unwrap().unwrap();
        assert_eq!(work.id, id);
        assert_eq!(work.kind, QueueKind::FileImport);
        assert_eq!(work.target_id, target);
        assert_eq!(work.attempts, 1);

        assert!(storage.claim_next().unwrap().is_none());
        assert_eq!(storage.count_outstanding().unwrap(), 1);

        storage.complete(id).unwrap();
        assert_eq!(storage.count_outstanding().unwrap(), 0);
    }

    #[test]
    fn test_claims_in_fifo_order() {
        let storage = SqliteStorage::open_memory().unwrap();
        let first = storage.enqueue(QueueKind::ImportJob, Uuid::new_v4()).unwrap();
        let second = storage.enqueue(QueueKind::ImportJob, Uuid::new_v4()).unwrap();

        assert_eq!(storage.claim_next().unwrap().unwrap().id, first);
        assert_eq!(storage.claim_next().unwrap().unwrap().id, second);
    }

    #[test]
    fn test_fail_retries_then_dies() {
        let storage = SqliteStorage::open_memory().unwrap();
        let id = storage.enqueue(QueueKind::FileImport, Uuid::new_v4()).unwrap();

        storage.claim_next().unwrap().unwrap();
        let outcome = storage.fail(id, "timeout", 2, 0).unwrap();
        assert!(matches!(outcome, QueueOutcome::Retry { .. }));

        let work = storage.claim_next().unwrap().unwrap();
        assert_eq!(work.attempts, 2);
        assert_eq!(storage.fail(id, "timeout again", 2, 0).unwrap(), QueueOutcome::Dead);

        assert!(storage.claim_next().unwrap().is_none());
        assert_eq!(storage.count_outstanding().unwrap(), 0);
        assert_eq!(storage.queue_last_error(id).unwrap().as_deref(), Some("timeout again"));
    }

    #[test]
    fn test_backoff_delays_claim() {
        let storage = SqliteStorage::open_memory().unwrap();
        let id = storage.enqueue(QueueKind::FileImport, Uuid::new_v4()).unwrap();
        storage.claim_next().unwrap().unwrap();

        let QueueOutcome::Retry { run_after } = storage.fail(id, "busy", 5, 60_000).unwrap() else {
            panic!("expected retry");
        };
        assert!(storage.claim_next().unwrap().is_none());
        assert_eq!(storage.next_run_after().unwrap(), Some(run_after));
    }

    #[test]
    fn test_release_stale_requeues_running() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage.enqueue(QueueKind::FileImport, Uuid::new_v4()).unwrap();
        storage.claim_next().unwrap().unwrap();

        assert_eq!(storage.release_stale(60_000).unwrap(), 0);
        assert_eq!(storage.release_stale(-1).unwrap(), 1);

        let again = storage.claim_next().unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }
}
