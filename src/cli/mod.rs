//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// hoist - bulk import of JSON collections from blob storage
#[derive(Parser, Debug)]
#[command(name = "hoist", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.hoist/data/hoist.db)
    #[arg(long, global = true, env = "HOIST_DB")]
    pub db: Option<PathBuf>,

    /// Actor name for audit trail
    #[arg(long, global = true, env = "HOIST_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, alias = "robot", global = true)]
    pub json: bool,

    /// Output only the ID (for scripting)
    #[arg(long, global = true)]
    pub silent: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the hoist database
    Init {
        /// Overwrite existing database
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Organization management
    Org {
        #[command(subcommand)]
        command: OrgCommands,
    },

    /// Application management
    App {
        #[command(subcommand)]
        command: AppCommands,
    },

    /// Schedule, run and inspect imports
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },

    /// Export a collection to blob storage in the import format
    Export(ExportArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Tenant Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum OrgCommands {
    /// Register an organization
    Create {
        /// Organization name (used as the blob name prefix)
        name: String,
    },

    /// List organizations
    List,
}

#[derive(Subcommand, Debug)]
pub enum AppCommands {
    /// Register an application under an organization
    Create {
        /// Owning organization ID
        #[arg(long)]
        org: String,

        /// Application name
        name: String,
    },

    /// List the applications of an organization
    List {
        /// Organization ID
        #[arg(long)]
        org: String,
    },
}

// ============================================================================
// Import Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ImportCommands {
    /// Schedule an import job
    Schedule(ScheduleArgs),

    /// Run queued import work
    Run {
        /// Run a single round instead of draining the queue
        #[arg(long)]
        once: bool,
    },

    /// Show the state of an import job
    Status {
        /// Import job ID
        id: Option<String>,
    },

    /// List recent import jobs
    List {
        /// Maximum jobs to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show the state changes of a job
    History {
        /// Import job ID
        job_id: String,

        /// Maximum events to show
        #[arg(long, default_value = "100")]
        limit: u32,
    },

    /// List the file tasks of a job
    Files {
        /// Import job ID
        job_id: String,
    },

    /// List the records that failed in a file task
    Errors {
        /// File task ID
        file_task_id: String,
    },
}

/// Blob store connection flags.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Storage provider (s3 or local)
    #[arg(long, default_value = "s3")]
    pub provider: String,

    /// Bucket name (s3) or directory (local)
    #[arg(long)]
    pub bucket: String,

    /// Access key ID
    #[arg(long, env = "HOIST_ACCESS_ID")]
    pub access_id: Option<String>,

    /// Secret access key
    #[arg(long, env = "HOIST_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Bucket region
    #[arg(long)]
    pub region: Option<String>,

    /// Endpoint URL for S3-compatible stores
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Organization ID
    #[arg(long)]
    pub org: String,

    /// Application ID (omit for an organization-wide import)
    #[arg(long)]
    pub app: Option<String>,

    /// Collection name (requires --app)
    #[arg(long, requires = "app")]
    pub collection: Option<String>,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Organization ID
    #[arg(long)]
    pub org: String,

    /// Application ID
    #[arg(long)]
    pub app: String,

    /// Collection name
    #[arg(long)]
    pub collection: String,

    #[command(flatten)]
    pub storage: StorageArgs,
}
