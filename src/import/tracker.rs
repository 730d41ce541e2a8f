//! Per-file progress tracking.
//!
//! Counters are atomics bumped by every write worker. The persisted
//! [`FileTask`] snapshot sits behind a mutex that doubles as the flush lock:
//! batch flushes only ever `try_lock` it, so a worker never waits on
//! persistence; `complete` and `fatal` take it blocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::{debug, warn};

use crate::config::FailurePolicy;
use crate::error::Result;
use crate::model::{FailedImportRecord, FailureKind, FileTask, JobState};
use crate::storage::ProgressStore;

/// Live counters for one file task.
pub struct ProgressTracker<'a> {
    store: &'a dyn ProgressStore,
    task: Mutex<FileTask>,
    task_id: uuid::Uuid,
    entities_written: AtomicU64,
    entities_failed: AtomicU64,
    connections_written: AtomicU64,
    connections_failed: AtomicU64,
    batch: AtomicU64,
    flush_interval: u64,
    policy: FailurePolicy,
    note: Mutex<Option<String>>,
}

impl<'a> ProgressTracker<'a> {
    /// Start tracking from the counters already persisted on `task`.
    #[must_use]
    pub fn new(
        store: &'a dyn ProgressStore,
        task: FileTask,
        flush_interval: u64,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            task_id: task.id,
            entities_written: AtomicU64::new(task.entities_imported),
            entities_failed: AtomicU64::new(task.entities_failed),
            connections_written: AtomicU64::new(task.connections_imported),
            connections_failed: AtomicU64::new(task.connections_failed),
            batch: AtomicU64::new(0),
            flush_interval: flush_interval.max(1),
            policy,
            note: Mutex::new(None),
            task: Mutex::new(task),
        }
    }

    pub fn entity_written(&self) {
        self.entities_written.fetch_add(1, Ordering::SeqCst);
    }

    /// Count an entity failure and persist its record.
    ///
    /// # Errors
    ///
    /// Returns an error if the failure record cannot be written. The
    /// counter is bumped either way.
    pub fn entity_failed(&self, message: &str) -> Result<()> {
        self.entities_failed.fetch_add(1, Ordering::SeqCst);
        warn!(file_task_id = %self.task_id, "{message}");
        self.store
            .record_failure(&FailedImportRecord::new(self.task_id, FailureKind::Entity, message))
    }

    pub fn connection_written(&self) {
        self.connections_written.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a connection failure and persist its record.
    ///
    /// # Errors
    ///
    /// Returns an error if the failure record cannot be written.
    pub fn connection_failed(&self, message: &str) -> Result<()> {
        self.connections_failed.fetch_add(1, Ordering::SeqCst);
        warn!(file_task_id = %self.task_id, "{message}");
        self.store.record_failure(&FailedImportRecord::new(
            self.task_id,
            FailureKind::Connection,
            message,
        ))
    }

    /// Note a dictionary failure on the task message. Not counted.
    pub fn dictionary_failed(&self, message: &str) {
        warn!(file_task_id = %self.task_id, "{message}");
        *lock(&self.note) = Some(message.to_string());
    }

    /// Count one processed event and flush if a batch is full.
    ///
    /// Returns `true` if this call persisted a snapshot. If another thread
    /// holds the flush lock, returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted; the batch is
    /// left full so the next call retries.
    pub fn maybe_flush(&self) -> Result<bool> {
        let pending = self.batch.fetch_add(1, Ordering::SeqCst) + 1;
        if pending < self.flush_interval {
            return Ok(false);
        }

        let mut task = match self.task.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(false),
        };
        // Another thread may have drained the batch before we got the lock.
        if self.batch.load(Ordering::SeqCst) < self.flush_interval {
            return Ok(false);
        }

        self.persist(&mut task, None, None)?;
        self.batch.fetch_sub(self.flush_interval, Ordering::SeqCst);
        debug!(
            file_task_id = %self.task_id,
            entities = self.total_entities(),
            connections = self.total_connections(),
            "Flushed import progress"
        );
        Ok(true)
    }

    /// Persist the final counters: FAILED if anything failed, else FINISHED.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted.
    pub fn complete(&self) -> Result<JobState> {
        let state = if self.entities_failed() > 0 || self.connections_failed() > 0 {
            JobState::Failed
        } else {
            JobState::Finished
        };
        let mut task = lock(&self.task);
        self.persist(&mut task, Some(state), None)?;
        Ok(state)
    }

    /// Persist the counters and force FAILED with `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be persisted.
    pub fn fatal(&self, message: &str) -> Result<()> {
        let mut task = lock(&self.task);
        self.persist(&mut task, Some(JobState::Failed), Some(message))
    }

    fn persist(
        &self,
        task: &mut FileTask,
        state: Option<JobState>,
        message: Option<&str>,
    ) -> Result<()> {
        task.entities_imported = self.entities_written();
        task.entities_failed = self.entities_failed();
        task.connections_imported = self.connections_written();
        task.connections_failed = self.connections_failed();
        task.error_message = match message {
            Some(message) => Some(message.to_string()),
            None => self.status_message(),
        };
        if let Some(state) = state {
            task.state = state;
        }
        task.updated_at = chrono::Utc::now().timestamp_millis();
        self.store.save_progress(task)
    }

    /// Human-readable summary stored on the task.
    fn status_message(&self) -> Option<String> {
        let entities = self.entities_failed();
        let connections = self.connections_failed();
        if entities > 0 || connections > 0 {
            return Some(format!(
                "Failed to import {entities} entities and {connections} connections. \
                 See the import errors for details."
            ));
        }
        lock(&self.note).clone()
    }

    #[must_use]
    pub fn should_stop_processing_entities(&self) -> bool {
        self.policy
            .should_stop(self.entities_written(), self.entities_failed())
    }

    #[must_use]
    pub fn should_stop_processing_connections(&self) -> bool {
        self.policy
            .should_stop(self.connections_written(), self.connections_failed())
    }

    #[must_use]
    pub fn entities_written(&self) -> u64 {
        self.entities_written.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn entities_failed(&self) -> u64 {
        self.entities_failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn total_entities(&self) -> u64 {
        self.entities_written() + self.entities_failed()
    }

    #[must_use]
    pub fn connections_written(&self) -> u64 {
        self.connections_written.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connections_failed(&self) -> u64 {
        self.connections_failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.connections_written() + self.connections_failed()
    }

    /// The last persisted snapshot.
    #[must_use]
    pub fn snapshot(&self) -> FileTask {
        lock(&self.task).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
