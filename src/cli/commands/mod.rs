//! Command implementations.

pub mod completions;
pub mod export;
pub mod import;
pub mod init;
pub mod tenant;
pub mod version;

use std::path::PathBuf;

use uuid::Uuid;

use crate::cli::StorageArgs;
use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::model::StorageInfo;
use crate::storage::SqliteStorage;

/// Open the database, failing with `NotInitialized` if it does not exist.
pub(crate) fn open_storage(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }

    SqliteStorage::open(&db_path)
}

pub(crate) fn parse_id(field: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| Error::InvalidArgument(format!("{field} '{value}' is not a valid ID")))
}

pub(crate) fn storage_info(args: &StorageArgs) -> StorageInfo {
    StorageInfo {
        bucket_location: args.bucket.clone(),
        access_id: args.access_id.clone(),
        secret_key: args.secret_key.clone(),
        region: args.region.clone(),
        endpoint: args.endpoint.clone(),
    }
}

pub(crate) fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts).map_or_else(|| ts.to_string(), |dt| dt.to_rfc3339())
}
