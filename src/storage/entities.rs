//! Target entity store backed by SQLite.
//!
//! Entities are keyed by `(application_id, uuid)`. Connections are directed,
//! named edges; dictionaries are named JSON maps hanging off an entity.

use rusqlite::OptionalExtension;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::sqlite::{conversion_error, uuid_at};
use crate::storage::{EntityStore, SqliteStorage};

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub uuid: Uuid,
    pub entity_type: String,
    pub properties: Map<String, Value>,
}

impl Entity {
    #[must_use]
    pub fn new(uuid: Uuid, entity_type: &str, properties: Map<String, Value>) -> Self {
        Self {
            uuid,
            entity_type: entity_type.to_string(),
            properties,
        }
    }
}

/// Reference to an entity whose type may not be known yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub uuid: Uuid,
    pub entity_type: Option<String>,
}

impl EntityRef {
    #[must_use]
    pub const fn untyped(uuid: Uuid) -> Self {
        Self {
            uuid,
            entity_type: None,
        }
    }
}

fn parse_map(raw: &str, idx: usize) -> rusqlite::Result<Map<String, Value>> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, e))
}

impl SqliteStorage {
    fn entity_type_of(&self, application_id: Uuid, uuid: Uuid) -> Result<Option<String>> {
        let conn = self.conn();
        let entity_type = conn
            .query_row(
                "SELECT entity_type FROM entities WHERE application_id = ?1 AND uuid = ?2",
                [application_id.to_string(), uuid.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(entity_type)
    }

    /// Count the entities of an application (all types).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_entities(&self, application_id: Uuid) -> Result<u64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE application_id = ?1",
            [application_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count the connection edges of an application.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_connections(&self, application_id: Uuid) -> Result<u64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM connections WHERE application_id = ?1",
            [application_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl EntityStore for SqliteStorage {
    fn create_entity(&self, application_id: Uuid, entity: &Entity) -> Result<()> {
        if entity.entity_type.trim().is_empty() {
            return Err(Error::EntityWrite(format!(
                "Entity {} has no type",
                entity.uuid
            )));
        }
        let now = chrono::Utc::now().timestamp_millis();
        let properties = serde_json::to_string(&entity.properties)?;
        let app = application_id.to_string();
        let uuid = entity.uuid.to_string();
        let conn = self.conn();
        // The type guard is part of the upsert, so a concurrent writer with
        // another type cannot slip in between check and write.
        let changed = conn.execute(
            "INSERT INTO entities (application_id, uuid, entity_type, properties, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(application_id, uuid) DO UPDATE SET
                properties = excluded.properties,
                modified_at = excluded.modified_at
             WHERE entities.entity_type = excluded.entity_type",
            rusqlite::params![app, uuid, entity.entity_type, properties, now],
        )?;
        if changed == 0 {
            let existing: String = conn.query_row(
                "SELECT entity_type FROM entities WHERE application_id = ?1 AND uuid = ?2",
                [&app, &uuid],
                |row| row.get(0),
            )?;
            return Err(Error::EntityWrite(format!(
                "Entity {} already exists with type {existing}",
                entity.uuid
            )));
        }
        Ok(())
    }

    fn get_entity(&self, application_id: Uuid, uuid: Uuid) -> Result<Option<Entity>> {
        let conn = self.conn();
        let entity = conn
            .query_row(
                "SELECT uuid, entity_type, properties FROM entities
                 WHERE application_id = ?1 AND uuid = ?2",
                [application_id.to_string(), uuid.to_string()],
                |row| {
                    let properties: String = row.get(2)?;
                    Ok(Entity {
                        uuid: uuid_at(row, 0)?,
                        entity_type: row.get(1)?,
                        properties: parse_map(&properties, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(entity)
    }

    fn create_connection(
        &self,
        application_id: Uuid,
        source: &EntityRef,
        relation: &str,
        target: Uuid,
    ) -> Result<()> {
        let source_type = match &source.entity_type {
            Some(t) => t.clone(),
            None => self
                .entity_type_of(application_id, source.uuid)?
                .ok_or_else(|| {
                    Error::EntityWrite(format!("Source entity {} does not exist", source.uuid))
                })?,
        };
        if self.entity_type_of(application_id, target)?.is_none() {
            return Err(Error::EntityWrite(format!(
                "Target entity {target} does not exist"
            )));
        }

        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO connections (application_id, source, source_type, relation, target, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                application_id.to_string(),
                source.uuid.to_string(),
                source_type,
                relation,
                target.to_string(),
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn merge_dictionary(
        &self,
        application_id: Uuid,
        owner: Uuid,
        name: &str,
        entries: &Map<String, Value>,
    ) -> Result<()> {
        if self.entity_type_of(application_id, owner)?.is_none() {
            return Err(Error::EntityWrite(format!(
                "Dictionary owner {owner} does not exist"
            )));
        }

        self.mutate("merge_dictionary", "import", |tx, _ctx| {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT entries FROM dictionaries
                     WHERE application_id = ?1 AND owner = ?2 AND name = ?3",
                    rusqlite::params![application_id.to_string(), owner.to_string(), name],
                    |row| row.get(0),
                )
                .optional()?;
            let mut merged: Map<String, Value> = match existing {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Map::new(),
            };
            for (key, value) in entries {
                merged.insert(key.clone(), value.clone());
            }

            tx.execute(
                "INSERT INTO dictionaries (application_id, owner, name, entries, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(application_id, owner, name) DO UPDATE SET
                    entries = excluded.entries,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    application_id.to_string(),
                    owner.to_string(),
                    name,
                    serde_json::to_string(&merged)?,
                    chrono::Utc::now().timestamp_millis()
                ],
            )?;
            Ok(())
        })
    }

    fn list_entities(&self, application_id: Uuid, entity_type: &str) -> Result<Vec<Entity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT uuid, entity_type, properties FROM entities
             WHERE application_id = ?1 AND entity_type = ?2 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([application_id.to_string(), entity_type.to_string()], |row| {
            let properties: String = row.get(2)?;
            Ok(Entity {
                uuid: uuid_at(row, 0)?,
                entity_type: row.get(1)?,
                properties: parse_map(&properties, 2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn connections_from(&self, application_id: Uuid, source: Uuid) -> Result<Vec<(String, Uuid)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT relation, target FROM connections
             WHERE application_id = ?1 AND source = ?2 ORDER BY relation, rowid",
        )?;
        let rows = stmt.query_map([application_id.to_string(), source.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, uuid_at(row, 1)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn dictionaries_of(
        &self,
        application_id: Uuid,
        owner: Uuid,
    ) -> Result<Vec<(String, Map<String, Value>)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name, entries FROM dictionaries
             WHERE application_id = ?1 AND owner = ?2 ORDER BY name",
        )?;
        let rows = stmt.query_map([application_id.to_string(), owner.to_string()], |row| {
            let entries: String = row.get(1)?;
            Ok((row.get::<_, String>(0)?, parse_map(&entries, 1)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}
