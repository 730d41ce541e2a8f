//! `hoist export` - write a collection to blob storage in the import format.

use crate::blob::{BlobConnector, DefaultConnector};
use crate::cli::commands::{open_storage, parse_id, storage_info};
use crate::cli::ExportArgs;
use crate::config::default_actor;
use crate::error::Result;
use crate::import::CollectionExporter;
use std::path::PathBuf;

/// Execute the export command.
///
/// # Errors
///
/// Returns an error if the scope is unknown, the store cannot be reached,
/// or the upload fails.
pub fn execute(
    args: &ExportArgs,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(db_path)?;
    let actor = actor.map_or_else(default_actor, String::from);
    let store = DefaultConnector.connect(&args.storage.provider, &storage_info(&args.storage))?;

    let summary = CollectionExporter::new(&storage, &storage).export(
        parse_id("organization", &args.org)?,
        parse_id("application", &args.app)?,
        args.collection.trim(),
        store.as_ref(),
        &actor,
    )?;

    if crate::is_silent() {
        println!("{}", summary.blob_name);
    } else if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!(
            "Exported {} entities to {}",
            summary.entities, summary.blob_name
        );
    }
    Ok(())
}
