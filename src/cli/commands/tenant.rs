//! Organization and application commands.
//!
//! - `hoist org create <name>` / `hoist org list`
//! - `hoist app create --org <id> <name>` / `hoist app list --org <id>`

use crate::cli::commands::{format_timestamp, open_storage, parse_id};
use crate::cli::{AppCommands, OrgCommands};
use crate::config::default_actor;
use crate::error::Result;
use crate::model::{Application, Organization};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct OrganizationOutput {
    id: String,
    name: String,
    created_at: String,
}

impl From<Organization> for OrganizationOutput {
    fn from(org: Organization) -> Self {
        Self {
            id: org.id.to_string(),
            name: org.name,
            created_at: format_timestamp(org.created_at),
        }
    }
}

#[derive(Serialize)]
struct ApplicationOutput {
    id: String,
    organization_id: String,
    name: String,
    created_at: String,
}

impl From<Application> for ApplicationOutput {
    fn from(app: Application) -> Self {
        Self {
            id: app.id.to_string(),
            organization_id: app.organization_id.to_string(),
            name: app.name,
            created_at: format_timestamp(app.created_at),
        }
    }
}

#[derive(Serialize)]
struct ListOutput<T> {
    count: usize,
    items: Vec<T>,
}

/// Execute an organization command.
///
/// # Errors
///
/// Returns an error if the database is missing or the write fails.
pub fn execute_org(
    command: &OrgCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(db_path)?;
    let actor = actor.map_or_else(default_actor, String::from);

    match command {
        OrgCommands::Create { name } => {
            let org = Organization::new(name.trim());
            storage.create_organization(&org, &actor)?;
            if crate::is_silent() {
                println!("{}", org.id);
            } else if json {
                println!("{}", serde_json::to_string(&OrganizationOutput::from(org))?);
            } else {
                println!("Created organization: {}", org.name);
                println!("  ID: {}", org.id);
            }
        }
        OrgCommands::List => {
            let orgs = storage.list_organizations()?;
            if json {
                let output = ListOutput {
                    count: orgs.len(),
                    items: orgs.into_iter().map(OrganizationOutput::from).collect(),
                };
                println!("{}", serde_json::to_string(&output)?);
            } else if orgs.is_empty() {
                println!("No organizations found.");
                println!("\nCreate one with: hoist org create <name>");
            } else {
                println!("Organizations ({}):\n", orgs.len());
                for org in &orgs {
                    println!("  {}", org.name);
                    println!("    ID: {}", org.id);
                }
            }
        }
    }

    Ok(())
}

/// Execute an application command.
///
/// # Errors
///
/// Returns `OrganizationNotFound` for an unknown organization, or an error
/// if the database is missing or the write fails.
pub fn execute_app(
    command: &AppCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(db_path)?;
    let actor = actor.map_or_else(default_actor, String::from);

    match command {
        AppCommands::Create { org, name } => {
            let app = Application::new(parse_id("organization", org)?, name.trim());
            storage.create_application(&app, &actor)?;
            if crate::is_silent() {
                println!("{}", app.id);
            } else if json {
                println!("{}", serde_json::to_string(&ApplicationOutput::from(app))?);
            } else {
                println!("Created application: {}", app.name);
                println!("  ID:           {}", app.id);
                println!("  Organization: {}", app.organization_id);
            }
        }
        AppCommands::List { org } => list_apps(&storage, org, json)?,
    }

    Ok(())
}

fn list_apps(storage: &SqliteStorage, org: &str, json: bool) -> Result<()> {
    let apps = storage.list_applications(parse_id("organization", org)?)?;
    if json {
        let output = ListOutput {
            count: apps.len(),
            items: apps.into_iter().map(ApplicationOutput::from).collect(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if apps.is_empty() {
        println!("No applications found.");
    } else {
        println!("Applications ({}):\n", apps.len());
        for app in &apps {
            println!("  {}", app.name);
            println!("    ID: {}", app.id);
        }
    }
    Ok(())
}
