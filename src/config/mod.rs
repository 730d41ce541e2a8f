//! Configuration management.
//!
//! This module resolves the hoist directories and database path, and loads
//! the import tuning knobs.
//!
//! # Layout
//!
//! - **Database**: `~/.hoist/data/hoist.db` unless `--db` or `HOIST_DB` say otherwise
//! - **Settings**: `~/.hoist/config.json`, overridden field by field from `HOIST_*` variables

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Get the global hoist directory location (`~/.hoist/`).
#[must_use]
pub fn global_hoist_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".hoist"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `HOIST_DB` environment variable
/// 3. Global location: `~/.hoist/data/hoist.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var("HOIST_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_hoist_dir().map(|dir| dir.join("data").join("hoist.db"))
}

/// Get the default actor name recorded on audit events.
///
/// Priority:
/// 1. `HOIST_ACTOR` environment variable
/// 2. System username
/// 3. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("HOIST_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(user) = std::env::var("USER") {
        if !user.is_empty() {
            return user;
        }
    }

    "unknown".to_string()
}

/// When a pass stops taking new records because of failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop a pass at its first failure.
    #[default]
    FailFast,
    /// Stop a pass once the failure rate exceeds `max_failure_rate` after
    /// at least `min_sample` records of that pass were attempted.
    Threshold { max_failure_rate: f64, min_sample: u64 },
}

impl FailurePolicy {
    /// Whether a pass with these counts should take no more work.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn should_stop(&self, written: u64, failed: u64) -> bool {
        match *self {
            Self::FailFast => failed > 0,
            Self::Threshold {
                max_failure_rate,
                min_sample,
            } => {
                let attempted = written + failed;
                attempted > 0
                    && attempted >= min_sample
                    && (failed as f64 / attempted as f64) > max_failure_rate
            }
        }
    }
}

/// Tuning for the import pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Tracker events between persisted progress snapshots.
    pub flush_interval: u64,
    /// Processed write events between heartbeats.
    pub heartbeat_interval: u64,
    /// Size of the write worker pool for one file.
    pub write_workers: usize,
    /// Files imported concurrently by the scheduler.
    pub file_workers: usize,
    /// Cap on files discovered for one job.
    pub max_file_imports: usize,
    /// Queue deliveries before a file task is dead-lettered.
    pub max_attempts: u32,
    pub failure_policy: FailurePolicy,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            flush_interval: 100,
            heartbeat_interval: 50,
            write_workers: 10,
            file_workers: 4,
            max_file_imports: 1000,
            max_attempts: 3,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

impl ImportSettings {
    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let zeroes = [
            ("flush_interval", self.flush_interval == 0),
            ("heartbeat_interval", self.heartbeat_interval == 0),
            ("write_workers", self.write_workers == 0),
            ("file_workers", self.file_workers == 0),
            ("max_file_imports", self.max_file_imports == 0),
            ("max_attempts", self.max_attempts == 0),
        ];
        if let Some((field, _)) = zeroes.iter().find(|(_, zero)| *zero) {
            return Err(Error::Config(format!("{field} must be greater than zero")));
        }
        if let FailurePolicy::Threshold {
            max_failure_rate, ..
        } = self.failure_policy
        {
            if !(0.0..=1.0).contains(&max_failure_rate) {
                return Err(Error::Config(format!(
                    "max_failure_rate must be between 0 and 1, got {max_failure_rate}"
                )));
            }
        }
        Ok(())
    }

    /// Overlay `HOIST_*` values read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a variable is set but not a number.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{name} must be a number, got '{raw}'")))
        }

        if let Some(raw) = lookup("HOIST_FLUSH_INTERVAL") {
            self.flush_interval = parsed("HOIST_FLUSH_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("HOIST_HEARTBEAT_INTERVAL") {
            self.heartbeat_interval = parsed("HOIST_HEARTBEAT_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("HOIST_WRITE_WORKERS") {
            self.write_workers = parsed("HOIST_WRITE_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("HOIST_FILE_WORKERS") {
            self.file_workers = parsed("HOIST_FILE_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("HOIST_MAX_FILE_IMPORTS") {
            self.max_file_imports = parsed("HOIST_MAX_FILE_IMPORTS", &raw)?;
        }
        if let Some(raw) = lookup("HOIST_MAX_ATTEMPTS") {
            self.max_attempts = parsed("HOIST_MAX_ATTEMPTS", &raw)?;
        }
        Ok(())
    }
}

/// The hoist configuration file structure.
///
/// Stored at `~/.hoist/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoistConfig {
    #[serde(default)]
    pub import: ImportSettings,
}

/// Get the config file path.
fn config_path() -> Result<PathBuf> {
    global_hoist_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

/// Load a configuration file; a missing file yields the defaults.
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<HoistConfig> {
    if !path.exists() {
        return Ok(HoistConfig::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Write a configuration file, creating its directory.
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be written.
pub fn save_config_to(path: &Path, config: &HoistConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    fs::write(path, content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))
}

/// Load the global configuration.
///
/// # Errors
///
/// Returns `Error::Config` if the file exists but is unreadable.
pub fn load_config() -> Result<HoistConfig> {
    load_config_from(&config_path()?)
}

/// Resolve the effective import settings.
///
/// Priority: environment variables > config file > defaults.
///
/// # Errors
///
/// Returns `Error::Config` if the file or an override is invalid.
pub fn load_settings() -> Result<ImportSettings> {
    let mut settings = load_config()?.import;
    settings.apply_env(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_default_actor_not_empty() {
        assert!(!default_actor().is_empty());
    }

    #[test]
    fn test_defaults() {
        let settings = ImportSettings::default();
        assert_eq!(settings.flush_interval, 100);
        assert_eq!(settings.heartbeat_interval, 50);
        assert_eq!(settings.write_workers, 10);
        assert_eq!(settings.max_file_imports, 1000);
        assert_eq!(settings.failure_policy, FailurePolicy::FailFast);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"import": {"flush_interval": 7, "failure_policy": {"mode": "threshold", "max_failure_rate": 0.1, "min_sample": 20}}}"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.import.flush_interval, 7);
        assert_eq!(config.import.write_workers, 10);
        assert_eq!(
            config.import.failure_policy,
            FailurePolicy::Threshold {
                max_failure_rate: 0.1,
                min_sample: 20
            }
        );
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = HoistConfig::default();
        config.import.file_workers = 2;

        save_config_to(&path, &config).unwrap();
        assert_eq!(load_config_from(&path).unwrap().import.file_workers, 2);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.import, ImportSettings::default());
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([("HOIST_FLUSH_INTERVAL", "5"), ("HOIST_WRITE_WORKERS", " 3 ")]);
        let mut settings = ImportSettings::default();
        settings
            .apply_env(|name| env.get(name).map(ToString::to_string))
            .unwrap();
        assert_eq!(settings.flush_interval, 5);
        assert_eq!(settings.write_workers, 3);
        assert_eq!(settings.heartbeat_interval, 50);
    }

    #[test]
    fn test_env_override_must_be_numeric() {
        let mut settings = ImportSettings::default();
        let err = settings
            .apply_env(|name| (name == "HOIST_MAX_ATTEMPTS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("HOIST_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_zero_rejected() {
        let settings = ImportSettings {
            write_workers: 0,
            ..ImportSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_threshold_policy() {
        let policy = FailurePolicy::Threshold {
            max_failure_rate: 0.1,
            min_sample: 10,
        };
        assert!(!policy.should_stop(0, 5));
        assert!(!policy.should_stop(95, 5));
        assert!(policy.should_stop(8, 2));
        assert!(FailurePolicy::FailFast.should_stop(100, 1));
        assert!(!FailurePolicy::FailFast.should_stop(100, 0));
    }
}
