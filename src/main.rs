//! hoist CLI entry point.

use clap::Parser;
use hoist::cli::commands;
use hoist::cli::{Cli, Commands};
use hoist::error::Error;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.silent {
        hoist::SILENT.store(true, Ordering::Relaxed);
    }
    if cli.no_color {
        colored::control::set_override(false);
    }

    init_tracing(cli.verbose, cli.quiet);

    // --json or piped stdout
    let json = cli.json || !std::io::stdout().is_terminal();

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();
    let actor = cli.actor.as_deref();

    match &cli.command {
        Commands::Init { force } => commands::init::execute(db, *force, json),
        Commands::Version => commands::version::execute(json),
        Commands::Org { command } => commands::tenant::execute_org(command, db, actor, json),
        Commands::App { command } => commands::tenant::execute_app(command, db, actor, json),
        Commands::Import { command } => commands::import::execute(command, db, actor, json),
        Commands::Export(args) => commands::export::execute(args, db, actor, json),
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
