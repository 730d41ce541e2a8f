//! `hoist version`.

use crate::error::Result;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput {
    name: &'static str,
    version: &'static str,
    schema_version: i32,
    profile: &'static str,
}

impl VersionOutput {
    fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            schema_version: CURRENT_SCHEMA_VERSION,
            profile: if cfg!(debug_assertions) { "debug" } else { "release" },
        }
    }
}

/// Print the crate version and database schema version.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let info = VersionOutput::current();

    if json {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        println!(
            "hoist version {} (schema v{}, {})",
            info.version, info.schema_version, info.profile
        );
    }
    Ok(())
}
