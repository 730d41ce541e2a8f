//! Test doubles for the import pipeline.

use std::collections::HashSet;
use std::sync::Mutex;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{FailedImportRecord, FileTask};
use crate::storage::{Entity, EntityRef, EntityStore, ProgressStore, SqliteStorage};

/// Keeps every snapshot and failure it is handed.
#[derive(Default)]
pub struct RecordingStore {
    saves: Mutex<Vec<FileTask>>,
    failures: Mutex<Vec<FailedImportRecord>>,
}

impl RecordingStore {
    pub fn saves(&self) -> Vec<FileTask> {
        self.saves.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<FailedImportRecord> {
        self.failures.lock().unwrap().clone()
    }
}

impl ProgressStore for RecordingStore {
    fn save_progress(&self, task: &FileTask) -> Result<()> {
        self.saves.lock().unwrap().push(task.clone());
        Ok(())
    }

    fn record_failure(&self, failure: &FailedImportRecord) -> Result<()> {
        self.failures.lock().unwrap().push(failure.clone());
        Ok(())
    }
}

/// Records the order of store calls and rejects chosen entities.
pub struct JournalingStore {
    inner: SqliteStorage,
    reject: HashSet<Uuid>,
    journal: Mutex<Vec<String>>,
}

impl JournalingStore {
    pub fn new(reject: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            inner: SqliteStorage::open_memory().unwrap(),
            reject: reject.into_iter().collect(),
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn inner(&self) -> &SqliteStorage {
        &self.inner
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

impl EntityStore for JournalingStore {
    fn create_entity(&self, application_id: Uuid, entity: &Entity) -> Result<()> {
        self.log(format!("entity {}", entity.uuid));
        if self.reject.contains(&entity.uuid) {
            return Err(Error::EntityWrite(format!("Rejected entity {}", entity.uuid)));
        }
        self.inner.create_entity(application_id, entity)
    }

    fn get_entity(&self, application_id: Uuid, uuid: Uuid) -> Result<Option<Entity>> {
        self.inner.get_entity(application_id, uuid)
    }

    fn create_connection(
        &self,
        application_id: Uuid,
        source: &EntityRef,
        relation: &str,
        target: Uuid,
    ) -> Result<()> {
        self.log(format!("connection {} {relation} {target}", source.uuid));
        self.inner
            .create_connection(application_id, source, relation, target)
    }

    fn merge_dictionary(
        &self,
        application_id: Uuid,
        owner: Uuid,
        name: &str,
        entries: &Map<String, Value>,
    ) -> Result<()> {
        self.log(format!("dictionary {owner} {name}"));
        self.inner
            .merge_dictionary(application_id, owner, name, entries)
    }

    fn list_entities(&self, application_id: Uuid, entity_type: &str) -> Result<Vec<Entity>> {
        self.inner.list_entities(application_id, entity_type)
    }

    fn connections_from(&self, application_id: Uuid, source: Uuid) -> Result<Vec<(String, Uuid)>> {
        self.inner.connections_from(application_id, source)
    }

    fn dictionaries_of(
        &self,
        application_id: Uuid,
        owner: Uuid,
    ) -> Result<Vec<(String, Map<String, Value>)>> {
        self.inner.dictionaries_of(application_id, owner)
    }
}

/// A JSON import file with `n` entities of type `user`, chained so each
/// entity likes the next one, and a dictionary on the first.
pub fn chained_users(ids: &[Uuid]) -> String {
    let elements: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let mut element = serde_json::json!({
                "Metadata": {"uuid": id.to_string(), "type": "user", "name": format!("user{i}")},
            });
            if let Some(next) = ids.get(i + 1) {
                element["connections"] = serde_json::json!({"likes": [next.to_string()]});
            }
            if i == 0 {
                element["dictionaries"] = serde_json::json!({"prefs": {"theme": "dark"}});
            }
            element
        })
        .collect();
    Value::Array(elements).to_string()
}
