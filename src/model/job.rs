//! Import job model.
//!
//! An import job is the top-level unit of work: one request to pull every
//! file matching a scope out of a bucket and into the entity store. The job
//! owns zero or more file tasks (see [`super::FileTask`]) through the
//! `file_tasks.job_id` foreign key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle state shared by import jobs and file tasks.
///
/// `CREATED -> SCHEDULED -> STARTED -> FINISHED | FAILED`. The two terminal
/// states never change once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Created,
    Scheduled,
    Started,
    Finished,
    Failed,
}

impl JobState {
    /// Get the string representation for storage and status queries.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Scheduled => "SCHEDULED",
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }

    /// True for FINISHED and FAILED.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "SCHEDULED" => Ok(Self::Scheduled),
            "STARTED" => Ok(Self::Started),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            other => Err(Error::InvalidArgument(format!("unknown job state: {other}"))),
        }
    }
}

/// Breadth of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Organization,
    Application,
    Collection,
}

impl ScopeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Application => "application",
            Self::Collection => "collection",
        }
    }
}

/// The (organization, application, collection) triple an import targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportScope {
    pub organization_id: Uuid,
    pub application_id: Option<Uuid>,
    pub collection: Option<String>,
}

impl ImportScope {
    /// Build and validate a scope.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` if a collection is named without an
    /// application, or if the collection name cannot appear in a file name.
    pub fn new(
        organization_id: Uuid,
        application_id: Option<Uuid>,
        collection: Option<String>,
    ) -> Result<Self> {
        let scope = Self {
            organization_id,
            application_id,
            collection,
        };
        scope.validate()?;
        Ok(scope)
    }

    /// Narrowest level named by this scope.
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match (&self.application_id, &self.collection) {
            (Some(_), Some(_)) => ScopeKind::Collection,
            (Some(_), None) => ScopeKind::Application,
            (None, _) => ScopeKind::Organization,
        }
    }

    /// Check the scope's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_some() && self.application_id.is_none() {
            return Err(Error::InvalidScope(
                "collectionName requires applicationId".to_string(),
            ));
        }
        if let Some(collection) = &self.collection {
            if collection.trim().is_empty() {
                return Err(Error::InvalidScope("collectionName is empty".to_string()));
            }
            if collection.contains(['.', '/']) {
                return Err(Error::InvalidScope(format!(
                    "collectionName '{collection}' may not contain '.' or '/'"
                )));
            }
        }
        Ok(())
    }
}

/// Connection details for the bucket an import reads from.
///
/// Accepts the legacy `s3_access_id` / `s3_key` spellings when deserializing.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub bucket_location: String,
    #[serde(default, alias = "s3_access_id", skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    #[serde(default, alias = "s3_key", skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl fmt::Debug for StorageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageInfo")
            .field("bucket_location", &self.bucket_location)
            .field("access_id", &self.access_id)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// A validated import submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub scope: ImportScope,
    pub storage_provider: String,
    pub storage_info: StorageInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    organization_id: Option<String>,
    application_id: Option<String>,
    collection_name: Option<String>,
    #[serde(default)]
    properties: RawProperties,
}

#[derive(Deserialize, Default)]
struct RawProperties {
    storage_provider: Option<String>,
    storage_info: Option<StorageInfo>,
}

impl ImportRequest {
    /// Parse a submission from its configuration map.
    ///
    /// Recognized keys: `organizationId` (required), `applicationId`,
    /// `collectionName`, `properties.storage_provider` and
    /// `properties.storage_info.{bucket_location, access_id, secret_key}`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` for a missing or malformed identifier or an
    /// inconsistent scope, and `InvalidArgument` for missing storage details.
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let raw: RawRequest = serde_json::from_value(config.clone())
            .map_err(|e| Error::InvalidArgument(format!("import configuration: {e}")))?;

        let organization_id = raw
            .organization_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::InvalidScope("organizationId is required".to_string()))
            .and_then(|s| parse_id("organizationId", s))?;

        let application_id = raw
            .application_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_id("applicationId", s))
            .transpose()?;

        let collection = raw.collection_name.filter(|s| !s.trim().is_empty());
        let scope = ImportScope::new(organization_id, application_id, collection)?;

        let storage_provider = raw
            .properties
            .storage_provider
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                Error::InvalidArgument("properties.storage_provider is required".to_string())
            })?;
        let storage_info = raw.properties.storage_info.ok_or_else(|| {
            Error::InvalidArgument("properties.storage_info is required".to_string())
        })?;
        if storage_info.bucket_location.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "properties.storage_info.bucket_location is required".to_string(),
            ));
        }

        Ok(Self {
            scope,
            storage_provider,
            storage_info,
        })
    }
}

fn parse_id(field: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|e| Error::InvalidScope(format!("{field} '{value}' is not a UUID: {e}")))
}

/// An import job as persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub scope: ImportScope,
    pub storage_provider: String,
    #[serde(skip_serializing)]
    pub storage_info: StorageInfo,
    pub state: JobState,
    pub error_message: Option<String>,
    pub file_count: u64,
    /// Unix milliseconds.
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

impl ImportJob {
    /// Create a new job in the CREATED state.
    #[must_use]
    pub fn new(request: ImportRequest) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            scope: request.scope,
            storage_provider: request.storage_provider,
            storage_info: request.storage_info,
            state: JobState::Created,
            error_message: None,
            file_count: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        }
    }
}
