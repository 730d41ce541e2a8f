//! Import commands.
//!
//! - `hoist import schedule` - validate and queue an import job
//! - `hoist import run` - drain the work queue
//! - `hoist import status <id>` - job state and message
//! - `hoist import list` - recent jobs
//! - `hoist import history <job-id>` - audit trail of a job
//! - `hoist import files <job-id>` - file tasks with counters
//! - `hoist import errors <file-task-id>` - records that failed

use crate::blob::DefaultConnector;
use crate::cli::commands::{format_timestamp, open_storage, parse_id, storage_info};
use crate::cli::{ImportCommands, ScheduleArgs};
use crate::config::{default_actor, load_settings};
use crate::error::Result;
use crate::import::ImportCoordinator;
use crate::model::{FailedImportRecord, FileTask, ImportJob, ImportRequest, ImportScope};
use crate::scheduler::Scheduler;
use crate::storage::events::Event;
use crate::storage::{FileTaskSummary, SqliteStorage};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct JobOutput {
    id: String,
    scope: String,
    organization_id: String,
    application_id: Option<String>,
    collection: Option<String>,
    storage_provider: String,
    bucket: String,
    state: String,
    error_message: Option<String>,
    file_count: u64,
    created_at: String,
    finished_at: Option<String>,
}

impl From<ImportJob> for JobOutput {
    fn from(job: ImportJob) -> Self {
        Self {
            id: job.id.to_string(),
            scope: job.scope.kind().as_str().to_string(),
            organization_id: job.scope.organization_id.to_string(),
            application_id: job.scope.application_id.map(|id| id.to_string()),
            collection: job.scope.collection,
            storage_provider: job.storage_provider,
            bucket: job.storage_info.bucket_location,
            state: job.state.as_str().to_string(),
            error_message: job.error_message,
            file_count: job.file_count,
            created_at: format_timestamp(job.created_at),
            finished_at: job.finished_at.map(format_timestamp),
        }
    }
}

#[derive(Serialize)]
struct StatusOutput {
    id: Option<String>,
    state: String,
    error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<FileTaskSummary>,
}

#[derive(Serialize)]
struct EventOutput {
    event: &'static str,
    actor: String,
    from: Option<String>,
    to: Option<String>,
    comment: Option<String>,
    at: String,
}

impl From<Event> for EventOutput {
    fn from(event: Event) -> Self {
        Self {
            event: event.event_type.as_str(),
            actor: event.actor,
            from: event.old_value,
            to: event.new_value,
            comment: event.comment,
            at: format_timestamp(event.created_at),
        }
    }
}

#[derive(Serialize)]
struct FilesOutput {
    job_id: String,
    count: usize,
    files: Vec<FileTask>,
}

#[derive(Serialize)]
struct ErrorsOutput {
    file_task_id: String,
    count: usize,
    errors: Vec<FailedImportRecord>,
}

/// Execute an import command.
///
/// # Errors
///
/// Returns an error if the database is missing, the settings are invalid,
/// or the submission is rejected.
pub fn execute(
    command: &ImportCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(db_path)?;
    let actor = actor.map_or_else(default_actor, String::from);

    match command {
        ImportCommands::Schedule(args) => execute_schedule(&storage, args, &actor, json),
        ImportCommands::Run { once } => execute_run(&storage, *once, &actor, json),
        ImportCommands::Status { id } => execute_status(&storage, id.as_deref(), json),
        ImportCommands::List { limit } => execute_list(&storage, *limit, json),
        ImportCommands::History { job_id, limit } => {
            execute_history(&storage, job_id, *limit, json)
        }
        ImportCommands::Files { job_id } => execute_files(&storage, job_id, json),
        ImportCommands::Errors { file_task_id } => execute_errors(&storage, file_task_id, json),
    }
}

fn execute_schedule(
    storage: &SqliteStorage,
    args: &ScheduleArgs,
    actor: &str,
    json: bool,
) -> Result<()> {
    let scope = ImportScope::new(
        parse_id("organization", &args.org)?,
        args.app
            .as_deref()
            .map(|app| parse_id("application", app))
            .transpose()?,
        args.collection.clone(),
    )?;
    let request = ImportRequest {
        scope,
        storage_provider: args.storage.provider.clone(),
        storage_info: storage_info(&args.storage),
    };

    let settings = load_settings()?;
    let coordinator = ImportCoordinator::new(storage, storage, &DefaultConnector, &settings);
    let job = coordinator.schedule_request(request, actor)?;

    if crate::is_silent() {
        println!("{}", job.id);
    } else if json {
        println!("{}", serde_json::to_string(&JobOutput::from(job))?);
    } else {
        println!("Scheduled import job: {}", job.id);
        println!("  Scope:  {}", job.scope.kind().as_str());
        println!("  Bucket: {}", job.storage_info.bucket_location);
        println!();
        println!("Run it with: hoist import run");
    }
    Ok(())
}

fn execute_run(storage: &SqliteStorage, once: bool, actor: &str, json: bool) -> Result<()> {
    let settings = load_settings()?;
    let coordinator = ImportCoordinator::new(storage, storage, &DefaultConnector, &settings);
    let scheduler = Scheduler::new(&coordinator, storage, &settings, actor);
    let stats = if once {
        scheduler.run_pending()?
    } else {
        scheduler.run_until_idle()?
    };

    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else if !crate::is_silent() {
        println!(
            "Completed {} queue entries ({} retried, {} dead-lettered)",
            stats.completed, stats.retried, stats.dead
        );
    }
    Ok(())
}

fn execute_status(storage: &SqliteStorage, id: Option<&str>, json: bool) -> Result<()> {
    let settings = load_settings()?;
    let coordinator = ImportCoordinator::new(storage, storage, &DefaultConnector, &settings);
    let state = coordinator.job_state(id);
    let error_message = coordinator.job_error_message(id);
    let files = match id.and_then(|id| parse_id("job", id).ok()) {
        Some(job_id) if storage.get_job(job_id)?.is_some() => {
            Some(storage.summarize_file_tasks(job_id)?)
        }
        _ => None,
    };

    if json {
        let output = StatusOutput {
            id: id.map(String::from),
            state,
            error_message,
            files,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", colorize_state(&state));
    if !error_message.is_empty() && error_message != state {
        println!("  {error_message}");
    }
    if let Some(files) = files {
        println!(
            "  Files: {} total, {} finished, {} failed, {} pending",
            files.total, files.finished, files.failed, files.pending
        );
    }
    Ok(())
}

fn execute_list(storage: &SqliteStorage, limit: u32, json: bool) -> Result<()> {
    let jobs = storage.list_jobs(limit)?;

    if json {
        let jobs: Vec<JobOutput> = jobs.into_iter().map(JobOutput::from).collect();
        let output = serde_json::json!({ "count": jobs.len(), "jobs": jobs });
        println!("{}", serde_json::to_string(&output)?);
    } else if jobs.is_empty() {
        println!("No import jobs found.");
    } else {
        println!("Import jobs ({}):\n", jobs.len());
        for job in &jobs {
            println!(
                "  {} {} ({}, {} files)",
                colorize_state(job.state.as_str()),
                job.id,
                job.scope.kind().as_str(),
                job.file_count
            );
            if let Some(message) = &job.error_message {
                println!("    {}", message.dimmed());
            }
        }
    }
    Ok(())
}

fn execute_history(storage: &SqliteStorage, job_id: &str, limit: u32, json: bool) -> Result<()> {
    let id = parse_id("job", job_id)?;
    if storage.get_job(id)?.is_none() {
        return Err(crate::error::Error::JobNotFound {
            id: job_id.to_string(),
        });
    }
    let events: Vec<EventOutput> = storage
        .job_history(id, Some(limit))?
        .into_iter()
        .map(EventOutput::from)
        .collect();

    if json {
        let output = serde_json::json!({ "job_id": id.to_string(), "count": events.len(), "events": events });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        for event in &events {
            let change = match (&event.from, &event.to) {
                (Some(from), Some(to)) => format!("{from} -> {}", colorize_state(to)),
                (None, Some(to)) => colorize_state(to),
                _ => String::new(),
            };
            println!("  {} {} {} ({})", event.at.dimmed(), event.event, change, event.actor);
            if let Some(comment) = &event.comment {
                println!("      {comment}");
            }
        }
    }
    Ok(())
}

fn execute_files(storage: &SqliteStorage, job_id: &str, json: bool) -> Result<()> {
    let id = parse_id("job", job_id)?;
    if storage.get_job(id)?.is_none() {
        return Err(crate::error::Error::JobNotFound {
            id: job_id.to_string(),
        });
    }
    let files = storage.list_file_tasks(id)?;

    if json {
        let output = FilesOutput {
            job_id: id.to_string(),
            count: files.len(),
            files,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if files.is_empty() {
        println!("No file tasks for this job.");
    } else {
        for task in &files {
            println!("  {} {}", colorize_state(task.state.as_str()), task.file_name.bold());
            println!("    ID:          {}", task.id);
            println!(
                "    Entities:    {} imported, {} failed",
                task.entities_imported, task.entities_failed
            );
            println!(
                "    Connections: {} imported, {} failed",
                task.connections_imported, task.connections_failed
            );
            if let Some(message) = &task.error_message {
                println!("    Message:     {message}");
            }
        }
    }
    Ok(())
}

fn execute_errors(storage: &SqliteStorage, file_task_id: &str, json: bool) -> Result<()> {
    let id = parse_id("file task", file_task_id)?;
    if storage.get_file_task(id)?.is_none() {
        return Err(crate::error::Error::FileTaskNotFound {
            id: file_task_id.to_string(),
        });
    }
    let errors = storage.list_failed_imports(id)?;

    if json {
        let output = ErrorsOutput {
            file_task_id: id.to_string(),
            count: errors.len(),
            errors,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if errors.is_empty() {
        println!("No failed records.");
    } else {
        println!("Failed records ({}):\n", errors.len());
        for record in &errors {
            println!("  [{}] {}", record.kind, record.message);
        }
    }
    Ok(())
}

fn colorize_state(state: &str) -> String {
    match state {
        "FINISHED" => state.green().to_string(),
        "FAILED" => state.red().to_string(),
        "STARTED" => state.yellow().to_string(),
        "CREATED" | "SCHEDULED" => state.cyan().to_string(),
        other => other.to_string(),
    }
}
