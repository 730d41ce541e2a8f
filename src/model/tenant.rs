//! Tenant directory: organizations and their applications.
//!
//! Imports resolve ids from the job scope to these records; their names
//! form the blob-name prefix (`<organization>/<application>.`).

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: i64,
}

impl Organization {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub created_at: i64,
}

impl Application {
    #[must_use]
    pub fn new(organization_id: Uuid, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
