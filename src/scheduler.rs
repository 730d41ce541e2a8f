//! Queue-driven job scheduler.
//!
//! Claims ready entries from the durable queue and runs them on scoped
//! threads, up to `file_workers` at a time. A failed delivery goes back to
//! the queue with exponential backoff; once an entry has used up
//! `max_attempts` it is dead-lettered through the coordinator.

use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ImportSettings;
use crate::error::{Error, Result};
use crate::import::ImportCoordinator;
use crate::model::JobState;
use crate::storage::{QueueKind, QueueOutcome, QueuedWork, SqliteStorage};

/// Longest idle wait between polls while entries are backing off.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(1);

/// What one or more scheduler rounds did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub completed: u64,
    pub retried: u64,
    pub dead: u64,
}

impl RunStats {
    const fn claimed(&self) -> u64 {
        self.completed + self.retried + self.dead
    }

    fn absorb(&mut self, other: Self) {
        self.completed += other.completed;
        self.retried += other.retried;
        self.dead += other.dead;
    }
}

pub struct Scheduler<'a> {
    coordinator: &'a ImportCoordinator<'a>,
    storage: &'a SqliteStorage,
    settings: &'a ImportSettings,
    actor: String,
    retry_base: Duration,
    stale_after: Duration,
}

impl<'a> Scheduler<'a> {
    #[must_use]
    pub fn new(
        coordinator: &'a ImportCoordinator<'a>,
        storage: &'a SqliteStorage,
        settings: &'a ImportSettings,
        actor: &str,
    ) -> Self {
        Self {
            coordinator,
            storage,
            settings,
            actor: actor.to_string(),
            retry_base: Duration::from_secs(1),
            stale_after: Duration::from_secs(300),
        }
    }

    /// Base of the retry backoff; delivery `n` waits `base * 2^n`.
    #[must_use]
    pub const fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Heartbeat age after which a running entry is handed out again.
    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run one round: claim up to `file_workers` ready entries and run them.
    ///
    /// # Errors
    ///
    /// Returns a database error from the queue itself. Failures of the
    /// work are recorded on the queue, not returned.
    pub fn run_pending(&self) -> Result<RunStats> {
        self.storage.release_stale(millis(self.stale_after))?;

        let mut claimed = Vec::new();
        while claimed.len() < self.settings.file_workers.max(1) {
            match self.storage.claim_next()? {
                Some(work) => claimed.push(work),
                None => break,
            }
        }
        if claimed.is_empty() {
            return Ok(RunStats::default());
        }
        debug!(claimed = claimed.len(), "Running queued work");

        let results: Vec<Result<JobState>> = thread::scope(|s| {
            let handles: Vec<_> = claimed
                .iter()
                .map(|work| {
                    thread::Builder::new()
                        .name(format!("hoist-{}", work.kind.as_str()))
                        .spawn_scoped(s, move || self.run(work))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Other("import worker panicked".into()))),
                    Err(e) => Err(Error::Io(e)),
                })
                .collect()
        });

        let mut stats = RunStats::default();
        for (work, result) in claimed.iter().zip(results) {
            self.settle(work, result, &mut stats)?;
        }
        Ok(stats)
    }

    /// Run rounds until the queue has nothing pending or running.
    ///
    /// # Errors
    ///
    /// Returns a database error from the queue itself.
    pub fn run_until_idle(&self) -> Result<RunStats> {
        let mut total = RunStats::default();
        loop {
            let round = self.run_pending()?;
            total.absorb(round);
            if self.storage.count_outstanding()? == 0 {
                break;
            }
            if round.claimed() == 0 {
                thread::sleep(self.idle_wait()?);
            }
        }
        info!(
            completed = total.completed,
            retried = total.retried,
            dead = total.dead,
            "Queue drained"
        );
        Ok(total)
    }

    fn run(&self, work: &QueuedWork) -> Result<JobState> {
        match work.kind {
            QueueKind::ImportJob => self.coordinator.execute(work.target_id, &self.actor),
            QueueKind::FileImport => {
                let heartbeat = || {
                    if let Err(e) = self.storage.heartbeat(work.id) {
                        warn!(queue_id = work.id, error = %e, "Heartbeat failed");
                    }
                };
                self.coordinator
                    .import_file(work.target_id, work.attempts, &heartbeat, &self.actor)
            }
        }
    }

    fn settle(&self, work: &QueuedWork, result: Result<JobState>, stats: &mut RunStats) -> Result<()> {
        let err = match result {
            Ok(state) => {
                self.storage.complete(work.id)?;
                debug!(queue_id = work.id, target = %work.target_id, state = %state, "Work done");
                stats.completed += 1;
                return Ok(());
            }
            Err(e) => e,
        };

        let message = err.to_string();
        // Only transient failures earn another delivery.
        let max_attempts = if err.is_retryable() {
            self.settings.max_attempts
        } else {
            work.attempts
        };
        match self
            .storage
            .fail(work.id, &message, max_attempts, self.retry_delay(work.attempts))?
        {
            QueueOutcome::Retry { run_after } => {
                warn!(
                    queue_id = work.id,
                    target = %work.target_id,
                    attempts = work.attempts,
                    run_after,
                    error = %message,
                    "Work failed, will retry"
                );
                stats.retried += 1;
            }
            QueueOutcome::Dead => {
                if let Err(e) = self.coordinator.dead_letter(
                    work.kind,
                    work.target_id,
                    work.attempts,
                    &message,
                    &self.actor,
                ) {
                    warn!(queue_id = work.id, error = %e, "Could not dead-letter work");
                }
                stats.dead += 1;
            }
        }
        Ok(())
    }

    fn retry_delay(&self, attempts: u32) -> i64 {
        let factor = 1u128 << attempts.min(20);
        i64::try_from(self.retry_base.as_millis().saturating_mul(factor)).unwrap_or(i64::MAX)
    }

    fn idle_wait(&self) -> Result<Duration> {
        let now = chrono::Utc::now().timestamp_millis();
        let wait = match self.storage.next_run_after()? {
            Some(at) => Duration::from_millis(u64::try_from(at - now).unwrap_or(0)),
            None => MAX_IDLE_WAIT,
        };
        Ok(wait.min(MAX_IDLE_WAIT))
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::testing::{FixedConnector, MemoryBlobStore};
    use crate::blob::{BlobConnector, BlobStore};
    use crate::import::testing::chained_users;
    use crate::model::{Application, ImportRequest, ImportScope, Organization, StorageInfo};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    /// Refuses the first `outages` connections.
    struct FlakyConnector {
        inner: FixedConnector,
        outages: AtomicU32,
    }

    impl BlobConnector for FlakyConnector {
        fn connect(&self, provider: &str, info: &StorageInfo) -> Result<Arc<dyn BlobStore>> {
            let remaining = self.outages.load(Ordering::SeqCst);
            if remaining > 0 {
                self.outages.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::StorageUnavailable("connection reset".into()));
            }
            self.inner.connect(provider, info)
        }
    }

    fn setup(storage: &SqliteStorage) -> ImportRequest {
        let org = Organization::new("acme");
        storage.create_organization(&org, "test").unwrap();
        let app = Application::new(org.id, "shop");
        storage.create_application(&app, "test").unwrap();
        ImportRequest {
            scope: ImportScope::new(org.id, Some(app.id), Some("users".into())).unwrap(),
            storage_provider: "memory".into(),
            storage_info: StorageInfo {
                bucket_location: "hoist-test".into(),
                ..StorageInfo::default()
            },
        }
    }

    fn settings() -> ImportSettings {
        ImportSettings {
            write_workers: 2,
            file_workers: 2,
            ..ImportSettings::default()
        }
    }

    /// Run the job entry so files are discovered, leaving file entries queued.
    fn discover(storage: &SqliteStorage, coordinator: &ImportCoordinator<'_>) {
        let work = storage.claim_next().unwrap().unwrap();
        assert_eq!(work.kind, QueueKind::ImportJob);
        coordinator.execute(work.target_id, "test").unwrap();
        storage.complete(work.id).unwrap();
    }

    #[test]
    fn test_run_until_idle_completes_job() {
        let storage = SqliteStorage::open_memory().unwrap();
        let request = setup(&storage);
        let blobs = Arc::new(MemoryBlobStore::default());
        for seq in 1..=3 {
            let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
            blobs.insert(&format!("acme/shop.users.{seq}.json"), chained_users(&ids));
        }
        let connector = FixedConnector(blobs);
        let settings = settings();
        let coordinator = ImportCoordinator::new(&storage, &storage, &connector, &settings);
        let job = coordinator.schedule_request(request, "test").unwrap();

        let stats = Scheduler::new(&coordinator, &storage, &settings, "test")
            .run_until_idle()
            .unwrap();

        assert_eq!(stats.completed, 4);
        assert_eq!(stats.dead, 0);
        assert_eq!(storage.count_outstanding().unwrap(), 0);
        let job = storage.get_job(job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.file_count, 3);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let storage = SqliteStorage::open_memory().unwrap();
        let request = setup(&storage);
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs.insert("acme/shop.users.1.json", chained_users(&[Uuid::new_v4(), Uuid::new_v4()]));
        let connector = FlakyConnector {
            inner: FixedConnector(blobs),
            outages: AtomicU32::new(0),
        };
        let settings = settings();
        let coordinator = ImportCoordinator::new(&storage, &storage, &connector, &settings);
        let job = coordinator.schedule_request(request, "test").unwrap();
        discover(&storage, &coordinator);
        connector.outages.store(1, Ordering::SeqCst);

        let stats = Scheduler::new(&coordinator, &storage, &settings, "test")
            .with_retry_base(Duration::ZERO)
            .run_until_idle()
            .unwrap();

        assert_eq!(stats.retried, 1);
        assert_eq!(stats.completed, 1);
        let task = storage.list_file_tasks(job.id).unwrap().remove(0);
        assert_eq!(task.state, JobState::Finished);
        assert_eq!(task.attempts, 2);
        assert_eq!(task.entities_imported, 2);
        assert_eq!(
            storage.get_job(job.id).unwrap().unwrap().state,
            JobState::Finished
        );
    }

    #[test]
    fn test_exhausted_retries_dead_letter_the_job() {
        let storage = SqliteStorage::open_memory().unwrap();
        let request = setup(&storage);
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs.insert("acme/shop.users.1.json", "[]");
        let connector = FixedConnector(blobs.clone());
        let settings = ImportSettings {
            max_attempts: 3,
            ..settings()
        };
        let coordinator = ImportCoordinator::new(&storage, &storage, &connector, &settings);
        let job = coordinator.schedule_request(request, "test").unwrap();
        discover(&storage, &coordinator);
        blobs.set_unavailable(true);

        let stats = Scheduler::new(&coordinator, &storage, &settings, "test")
            .with_retry_base(Duration::ZERO)
            .run_until_idle()
            .unwrap();

        assert_eq!(stats.retried, 2);
        assert_eq!(stats.dead, 1);
        let expected = "Import abandoned after 3 attempts: Storage unavailable: connection refused";
        let task = storage.list_file_tasks(job.id).unwrap().remove(0);
        assert_eq!(task.state, JobState::Failed);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.error_message.as_deref(), Some(expected));
        let job = storage.get_job(job.id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_message.as_deref(), Some(expected));
    }

    #[test]
    fn test_missing_target_is_not_retried() {
        let storage = SqliteStorage::open_memory().unwrap();
        let connector = FixedConnector(Arc::new(MemoryBlobStore::default()));
        let settings = settings();
        let coordinator = ImportCoordinator::new(&storage, &storage, &connector, &settings);
        let id = storage.enqueue(QueueKind::FileImport, Uuid::new_v4()).unwrap();

        let stats = Scheduler::new(&coordinator, &storage, &settings, "test")
            .run_pending()
            .unwrap();

        assert_eq!(stats.dead, 1);
        assert_eq!(stats.retried, 0);
        assert!(storage
            .queue_last_error(id)
            .unwrap()
            .unwrap()
            .starts_with("File task not found"));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let storage = SqliteStorage::open_memory().unwrap();
        let connector = FixedConnector(Arc::new(MemoryBlobStore::default()));
        let settings = settings();
        let coordinator = ImportCoordinator::new(&storage, &storage, &connector, &settings);
        let scheduler = Scheduler::new(&coordinator, &storage, &settings, "test");
        assert_eq!(scheduler.retry_delay(1), 2_000);
        assert_eq!(scheduler.retry_delay(2), 4_000);
        assert_eq!(scheduler.retry_delay(3), 8_000);
    }
}
