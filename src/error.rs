//! Error types for hoist.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, 6=import, etc.)
//! - Retryability flags for the job scheduler
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for hoist operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Not Found (exit 3)
    JobNotFound,
    FileTaskNotFound,
    OrganizationNotFound,
    ApplicationNotFound,

    // Validation (exit 4)
    InvalidScope,
    MalformedFileName,
    InvalidArgument,
    Unsupported,

    // Import (exit 6)
    StorageUnavailable,
    ParseError,
    EntityWriteError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::FileTaskNotFound => "FILE_TASK_NOT_FOUND",
            Self::OrganizationNotFound => "ORGANIZATION_NOT_FOUND",
            Self::ApplicationNotFound => "APPLICATION_NOT_FOUND",
            Self::InvalidScope => "INVALID_SCOPE",
            Self::MalformedFileName => "MALFORMED_FILE_NAME",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unsupported => "UNSUPPORTED",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::ParseError => "PARSE_ERROR",
            Self::EntityWriteError => "ENTITY_WRITE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::JobNotFound
            | Self::FileTaskNotFound
            | Self::OrganizationNotFound
            | Self::ApplicationNotFound => 3,
            Self::InvalidScope
            | Self::MalformedFileName
            | Self::InvalidArgument
            | Self::Unsupported => 4,
            Self::StorageUnavailable | Self::ParseError | Self::EntityWriteError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the job scheduler should deliver the work again.
    ///
    /// True for transient failures (blob store connectivity, a busy
    /// database, local I/O). False for bad input that will fail the
    /// same way on every attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable | Self::DatabaseError | Self::IoError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in hoist operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `hoist init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Import job not found: {id}")]
    JobNotFound { id: String },

    #[error("File task not found: {id}")]
    FileTaskNotFound { id: String },

    #[error("No organization could be found: {id}")]
    OrganizationNotFound { id: String },

    #[error("Application {id} does not exist")]
    ApplicationNotFound { id: String },

    #[error("Invalid import scope: {0}")]
    InvalidScope(String),

    #[error("Malformed file name '{name}': {reason}")]
    MalformedFileName { name: String, reason: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    EntityWrite(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::JobNotFound { .. } => ErrorCode::JobNotFound,
            Self::FileTaskNotFound { .. } => ErrorCode::FileTaskNotFound,
            Self::OrganizationNotFound { .. } => ErrorCode::OrganizationNotFound,
            Self::ApplicationNotFound { .. } => ErrorCode::ApplicationNotFound,
            Self::InvalidScope(_) => ErrorCode::InvalidScope,
            Self::MalformedFileName { .. } => ErrorCode::MalformedFileName,
            Self::Unsupported(_) => ErrorCode::Unsupported,
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            Self::Parse(_) => ErrorCode::ParseError,
            Self::EntityWrite(_) => ErrorCode::EntityWriteError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether the failed work may succeed on another delivery.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `hoist init` to initialize the database".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::JobNotFound { id } => Some(format!(
                "No import job with ID '{id}'. Job IDs are printed by `hoist import schedule`."
            )),

            Self::FileTaskNotFound { id } => Some(format!(
                "No file task with ID '{id}'. Use `hoist import files <job-id>` to list file tasks."
            )),

            Self::OrganizationNotFound { .. } => {
                Some("Use `hoist org list` to see known organizations.".to_string())
            }

            Self::ApplicationNotFound { .. } => {
                Some("Use `hoist app list --org <id>` to see applications.".to_string())
            }

            Self::InvalidScope(_) => Some(
                "A collection import needs --org, --app and --collection. \
                 --collection requires --app."
                    .to_string(),
            ),

            Self::MalformedFileName { .. } => Some(
                "Expected <organization>/<application>.<collection>.<sequence>.json".to_string(),
            ),

            Self::StorageUnavailable(_) => Some(
                "Check the bucket location and credentials. The job scheduler retries \
                 storage failures on the next delivery."
                    .to_string(),
            ),

            Self::Config(_) => Some("Settings are read from ~/.hoist/config.json".to_string()),

            Self::Unsupported(_)
            | Self::Parse(_)
            | Self::EntityWrite(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
