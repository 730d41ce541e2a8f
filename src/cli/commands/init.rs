//! Create the hoist database.
//!
//! The database lives at `~/.hoist/data/hoist.db` unless `--db` or
//! `HOIST_DB` point elsewhere. The schema is applied on open, so init only
//! has to create the directory and open the file once. Initializing the
//! default location also writes a default `~/.hoist/config.json` if none
//! exists yet.

use crate::config::{global_hoist_dir, resolve_db_path, save_config_to, HoistConfig};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PathBuf>,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the database exists and `force` is not
/// set, or an error if the directory or database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or_else(|| {
        Error::Config("Could not determine the hoist data directory".to_string())
    })?;

    if db_path.exists() && !force {
        return Err(Error::AlreadyInitialized { path: db_path });
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if force && db_path.exists() {
        fs::remove_file(&db_path)?;
    }
    drop(SqliteStorage::open(&db_path)?);

    let config = global_hoist_dir()
        .filter(|dir| db_path == dir.join("data").join("hoist.db"))
        .and_then(|dir| write_default_config(dir.join("config.json")));

    if json {
        let output = InitOutput {
            database: db_path,
            config,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if !crate::is_silent() {
        println!("Initialized hoist database");
        println!("  Database: {}", db_path.display());
        if let Some(config) = config {
            println!("  Config:   {}", config.display());
        }
        println!();
        println!("Next: register a tenant with 'hoist org create <name>'.");
    }

    Ok(())
}

/// Write the default settings file if there is none. Best effort.
fn write_default_config(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        return Some(path);
    }
    match save_config_to(&path, &HoistConfig::default()) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(error = %e, "Could not write default config");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_database() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("nested").join("hoist.db");

        execute(Some(&db), false, true).unwrap();

        assert!(db.exists());
        let storage = SqliteStorage::open(&db).unwrap();
        assert!(storage.list_organizations().unwrap().is_empty());
    }

    #[test]
    fn test_init_fails_if_already_initialized() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("hoist.db");

        execute(Some(&db), false, true).unwrap();
        let result = execute(Some(&db), false, true);
        assert!(matches!(result, Err(Error::AlreadyInitialized { .. })));
    }

    #[test]
    fn test_init_force_recreates() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("hoist.db");
        execute(Some(&db), false, true).unwrap();
        let storage = SqliteStorage::open(&db).unwrap();
        storage
            .create_organization(&crate::model::Organization::new("acme"), "test")
            .unwrap();
        drop(storage);

        execute(Some(&db), true, true).unwrap();

        let storage = SqliteStorage::open(&db).unwrap();
        assert!(storage.list_organizations().unwrap().is_empty());
    }
}
