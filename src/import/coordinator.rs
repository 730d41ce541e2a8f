//! Job and file-task state machine.
//!
//! ```text
//! CREATED -> SCHEDULED -> STARTED -> FINISHED | FAILED
//! ```
//!
//! `schedule` persists a job and queues it. `execute` resolves the scope,
//! discovers the job's files and fans out one file task per file.
//! `import_file` runs both passes over one file and then aggregates the
//! job: once every file task is terminal the job is FAILED if any of them
//! failed, FINISHED otherwise.

use std::path::Path;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blob::{BlobConnector, BlobSource};
use crate::config::ImportSettings;
use crate::error::{Error, Result};
use crate::import::event::{Heartbeat, ParseMode};
use crate::import::executor::WriteEventExecutor;
use crate::import::naming::FileNameCodec;
use crate::import::parser::EntityParser;
use crate::import::tracker::ProgressTracker;
use crate::model::{FileTask, ImportJob, ImportRequest, ImportScope, JobState};
use crate::storage::{EntityStore, QueueKind, SqliteStorage};

/// Status answer for a missing job id.
pub const NULL_ID: &str = "UUID passed in cannot be null";
/// Status answer for an id that names no job.
pub const INVALID_ID: &str = "No Such Element found";

/// Drives import jobs through their lifecycle.
pub struct ImportCoordinator<'a> {
    storage: &'a SqliteStorage,
    entities: &'a dyn EntityStore,
    connector: &'a dyn BlobConnector,
    settings: &'a ImportSettings,
}

/// What a job's scope resolved to.
struct ResolvedScope {
    codec: FileNameCodec,
    application_id: Uuid,
    collection: String,
}

impl<'a> ImportCoordinator<'a> {
    #[must_use]
    pub fn new(
        storage: &'a SqliteStorage,
        entities: &'a dyn EntityStore,
        connector: &'a dyn BlobConnector,
        settings: &'a ImportSettings,
    ) -> Self {
        Self {
            storage,
            entities,
            connector,
            settings,
        }
    }

    /// Validate a submission, persist it as a SCHEDULED job and queue it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` or `InvalidArgument` for a bad submission,
    /// or a database error.
    pub fn schedule(&self, config: &serde_json::Value, actor: &str) -> Result<Uuid> {
        let request = ImportRequest::from_config(config)?;
        Ok(self.schedule_request(request, actor)?.id)
    }

    /// Persist an already validated request as a SCHEDULED job and queue it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` if the scope is inconsistent, or a database error.
    pub fn schedule_request(&self, request: ImportRequest, actor: &str) -> Result<ImportJob> {
        request.scope.validate()?;
        let job = ImportJob::new(request);
        self.storage.create_job(&job, actor)?;
        self.storage
            .transition_job(job.id, JobState::Scheduled, None, actor)?;
        self.storage.enqueue(QueueKind::ImportJob, job.id)?;
        info!(
            job_id = %job.id,
            scope = job.scope.kind().as_str(),
            provider = %job.storage_provider,
            "Scheduled import job"
        );
        self.load_job(job.id)
    }

    /// Start a job: resolve its scope, discover files, create file tasks.
    ///
    /// Scope and storage problems fail the job and are reported through
    /// the returned state, not as an error. A terminal job is left alone.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound`, or a database error while recording state.
    pub fn execute(&self, job_id: Uuid, actor: &str) -> Result<JobState> {
        let job = self.load_job(job_id)?;
        if job.state.is_terminal() {
            debug!(job_id = %job_id, state = %job.state, "Job already terminal");
            return Ok(job.state);
        }

        self.storage
            .transition_job(job_id, JobState::Started, None, actor)?;
        match self.fan_out(&job, actor) {
            Ok(state) => Ok(state),
            Err(e @ Error::Database(_)) => Err(e),
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job_id, error = %message, "Import job failed");
                self.storage
                    .transition_job(job_id, JobState::Failed, Some(&message), actor)?;
                Ok(JobState::Failed)
            }
        }
    }

    fn fan_out(&self, job: &ImportJob, actor: &str) -> Result<JobState> {
        let scope = self.resolve(&job.scope)?;
        let store = self
            .connector
            .connect(&job.storage_provider, &job.storage_info)?;
        let files = BlobSource::new(store, self.settings.max_file_imports).discover(&scope.codec)?;
        let tasks: Vec<FileTask> = files
            .iter()
            .map(|file| FileTask::new(job.id, &file.name, scope.application_id, &scope.collection))
            .collect();
        // Every task exists before any is queued, so a partial run can never
        // look like a settled job.
        self.storage.create_file_tasks(job.id, &tasks, actor)?;

        if files.is_empty() {
            let message = format!(
                "No files found in the bucket: {}",
                job.storage_info.bucket_location
            );
            info!(job_id = %job.id, prefix = %scope.codec.prefix(), "{message}");
            self.storage
                .transition_job(job.id, JobState::Finished, Some(&message), actor)?;
            return Ok(JobState::Finished);
        }

        let mut queued = 0;
        for file in &files {
            // A redelivered job finds the tasks of its earlier run.
            let task = self
                .storage
                .find_file_task(job.id, &file.name)?
                .ok_or_else(|| Error::FileTaskNotFound {
                    id: file.name.clone(),
                })?;
            if task.state == JobState::Created {
                self.storage.enqueue(QueueKind::FileImport, task.id)?;
                self.storage
                    .transition_file_task(task.id, JobState::Scheduled, None, actor)?;
                queued += 1;
            }
        }
        info!(job_id = %job.id, files = files.len(), queued, "Scheduled file imports");
        Ok(JobState::Started)
    }

    fn resolve(&self, scope: &ImportScope) -> Result<ResolvedScope> {
        let organization = self
            .storage
            .get_organization(scope.organization_id)?
            .ok_or_else(|| Error::OrganizationNotFound {
                id: scope.organization_id.to_string(),
            })?;
        let Some(application_id) = scope.application_id else {
            return Err(Error::Unsupported(
                "Import organizations not supported".to_string(),
            ));
        };
        let application = self
            .storage
            .get_application(application_id)?
            .filter(|app| app.organization_id == organization.id)
            .ok_or_else(|| Error::ApplicationNotFound {
                id: application_id.to_string(),
            })?;
        let Some(collection) = scope.collection.as_deref() else {
            return Err(Error::Unsupported(
                "Import applications not supported".to_string(),
            ));
        };

        Ok(ResolvedScope {
            codec: FileNameCodec::for_scope(
                &organization.name,
                Some(&application.name),
                Some(collection),
            )?,
            application_id: application.id,
            collection: collection.to_string(),
        })
    }

    /// Import one file task, then aggregate its job.
    ///
    /// `attempt` is the queue delivery count. A task that is already
    /// STARTED is only picked up again on a redelivery (`attempt > 1`);
    /// a terminal task is never touched. Counters persisted by an earlier
    /// delivery are resumed, not recounted.
    ///
    /// # Errors
    ///
    /// Returns retryable errors (the file could not be fetched, the
    /// database was busy) so the scheduler can deliver the task again.
    /// Everything else fails the task and is reported through the state.
    pub fn import_file(
        &self,
        task_id: Uuid,
        attempt: u32,
        heartbeat: &dyn Heartbeat,
        actor: &str,
    ) -> Result<JobState> {
        let task = self.load_file_task(task_id)?;
        if task.state.is_terminal() {
            debug!(file_task_id = %task_id, state = %task.state, "File task already terminal");
            return Ok(task.state);
        }
        if task.state == JobState::Started && attempt <= 1 {
            debug!(file_task_id = %task_id, "File task already running");
            return Ok(task.state);
        }

        self.storage
            .transition_file_task(task_id, JobState::Started, None, actor)?;
        let attempts = self.storage.increment_file_task_attempts(task_id)?;
        let job = self.load_job(task.job_id)?;
        let task = self.load_file_task(task_id)?;
        info!(
            file_task_id = %task_id,
            file = %task.file_name,
            attempts,
            resumed_entities = task.total_entities(),
            resumed_connections = task.total_connections(),
            "Importing file"
        );

        let tracker = ProgressTracker::new(
            self.storage,
            task.clone(),
            self.settings.flush_interval,
            self.settings.failure_policy,
        );

        let fetched = self
            .connector
            .connect(&job.storage_provider, &job.storage_info)
            .and_then(|store| {
                BlobSource::new(store, self.settings.max_file_imports).download(&task.file_name)
            });
        let state = match fetched {
            Ok(file) => match self.run_passes(file.path(), &task, &tracker, heartbeat) {
                Ok(()) => tracker.complete()?,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    error!(file = %task.file_name, error = %e, "File import failed");
                    tracker.fatal(&e.to_string())?;
                    JobState::Failed
                }
            },
            Err(e) if e.is_retryable() => {
                warn!(file = %task.file_name, error = %e, "Could not fetch file");
                return Err(e);
            }
            Err(e) => {
                error!(file = %task.file_name, error = %e, "Could not fetch file");
                tracker.fatal(&e.to_string())?;
                JobState::Failed
            }
        };

        info!(
            file_task_id = %task_id,
            state = %state,
            entities = tracker.entities_written(),
            entities_failed = tracker.entities_failed(),
            connections = tracker.connections_written(),
            connections_failed = tracker.connections_failed(),
            "File import complete"
        );
        self.aggregate(task.job_id, actor)?;
        Ok(state)
    }

    fn run_passes(
        &self,
        path: &Path,
        task: &FileTask,
        tracker: &ProgressTracker<'_>,
        heartbeat: &dyn Heartbeat,
    ) -> Result<()> {
        let parser = EntityParser::new(path, &task.collection);
        let executor = WriteEventExecutor::new(
            self.entities,
            task.application_id,
            &task.file_name,
            self.settings.write_workers,
            self.settings.heartbeat_interval,
        );
        for mode in [ParseMode::EntitiesOnly, ParseMode::ConnectionsAndDictionaries] {
            executor.run_pass(parser.events(mode)?, mode, tracker, heartbeat)?;
        }
        Ok(())
    }

    /// Settle a job from its file tasks.
    ///
    /// Returns STARTED while any task is still open, or while fewer tasks
    /// exist than files were discovered.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` or a database error.
    pub fn aggregate(&self, job_id: Uuid, actor: &str) -> Result<JobState> {
        let job = self.load_job(job_id)?;
        let summary = self.storage.summarize_file_tasks(job_id)?;
        if (summary.total as u64) < job.file_count {
            debug!(
                job_id = %job_id,
                tasks = summary.total,
                files = job.file_count,
                "Job still fanning out"
            );
            return Ok(JobState::Started);
        }
        if !summary.all_terminal() {
            return Ok(JobState::Started);
        }

        let (state, message) = if summary.failed > 0 {
            (
                JobState::Failed,
                Some(format!(
                    "Failed to import {} of {} files",
                    summary.failed, summary.total
                )),
            )
        } else {
            (JobState::Finished, None)
        };
        if self
            .storage
            .transition_job(job_id, state, message.as_deref(), actor)?
        {
            info!(job_id = %job_id, state = %state, files = summary.total, "Import job complete");
            Ok(state)
        } else {
            Ok(self.load_job(job_id)?.state)
        }
    }

    /// Give up on a queue entry that ran out of deliveries.
    ///
    /// A file task and its job are both forced to FAILED; a job entry
    /// fails the job.
    ///
    /// # Errors
    ///
    /// Returns a database error, or a not-found error for the target.
    pub fn dead_letter(
        &self,
        kind: QueueKind,
        target_id: Uuid,
        attempts: u32,
        last_error: &str,
        actor: &str,
    ) -> Result<()> {
        let message = format!("Import abandoned after {attempts} attempts: {last_error}");
        error!(target_id = %target_id, kind = kind.as_str(), "{message}");
        match kind {
            QueueKind::FileImport => self
                .storage
                .dead_letter_file_task(target_id, &message, actor),
            QueueKind::ImportJob => self
                .storage
                .transition_job(target_id, JobState::Failed, Some(&message), actor)
                .map(|_| ()),
        }
    }

    /// State string of a job, or a sentinel string. Never fails.
    #[must_use]
    pub fn job_state(&self, id: Option<&str>) -> String {
        match self.lookup(id) {
            Ok(job) => job.state.as_str().to_string(),
            Err(sentinel) => sentinel.to_string(),
        }
    }

    /// Stored message of a job (empty if none), or a sentinel string.
    #[must_use]
    pub fn job_error_message(&self, id: Option<&str>) -> String {
        match self.lookup(id) {
            Ok(job) => job.error_message.unwrap_or_default(),
            Err(sentinel) => sentinel.to_string(),
        }
    }

    fn lookup(&self, id: Option<&str>) -> std::result::Result<ImportJob, &'static str> {
        let id = id.map(str::trim).filter(|s| !s.is_empty()).ok_or(NULL_ID)?;
        let id = Uuid::parse_str(id).map_err(|_| INVALID_ID)?;
        match self.storage.get_job(id) {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(INVALID_ID),
            Err(e) => {
                warn!(job_id = %id, error = %e, "Status lookup failed");
                Err(INVALID_ID)
            }
        }
    }

    fn load_job(&self, id: Uuid) -> Result<ImportJob> {
        self.storage
            .get_job(id)?
            .ok_or_else(|| Error::JobNotFound { id: id.to_string() })
    }

    fn load_file_task(&self, id: Uuid) -> Result<FileTask> {
        self.storage
            .get_file_task(id)?
            .ok_or_else(|| Error::FileTaskNotFound { id: id.to_string() })
    }
}
