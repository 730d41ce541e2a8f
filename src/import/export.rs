//! Collection export in the import file format.
//!
//! The output of an export can be fed straight back into an import: each
//! entity becomes one record with its `Metadata`, outgoing `connections`
//! and `dictionaries`.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};

use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::info;
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::import::naming::{singularize, FileNameCodec};
use crate::storage::events::EventType;
use crate::storage::{Entity, EntityStore, SqliteStorage};

/// Result of one export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub blob_name: String,
    pub entities: usize,
}

#[derive(Serialize)]
struct ExportRecord {
    #[serde(rename = "Metadata")]
    metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    connections: BTreeMap<String, Vec<Uuid>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    dictionaries: Map<String, Value>,
}

/// Writes one collection of an application to a blob store.
pub struct CollectionExporter<'a> {
    storage: &'a SqliteStorage,
    entities: &'a dyn EntityStore,
}

impl<'a> CollectionExporter<'a> {
    #[must_use]
    pub fn new(storage: &'a SqliteStorage, entities: &'a dyn EntityStore) -> Self {
        Self { storage, entities }
    }

    /// Export every entity of `collection` to
    /// `<org>/<app>.<collection>.<unix millis>.json`.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` / `ApplicationNotFound` for an unknown
    /// scope, `StorageUnavailable` if the upload fails, or a database error.
    pub fn export(
        &self,
        organization_id: Uuid,
        application_id: Uuid,
        collection: &str,
        store: &dyn BlobStore,
        actor: &str,
    ) -> Result<ExportSummary> {
        let organization = self
            .storage
            .get_organization(organization_id)?
            .ok_or_else(|| Error::OrganizationNotFound {
                id: organization_id.to_string(),
            })?;
        let application = self
            .storage
            .get_application(application_id)?
            .filter(|app| app.organization_id == organization.id)
            .ok_or_else(|| Error::ApplicationNotFound {
                id: application_id.to_string(),
            })?;
        let codec =
            FileNameCodec::for_scope(&organization.name, Some(&application.name), Some(collection))?;
        let stamp = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        let blob_name = codec.file_name(stamp);

        let entities = self
            .entities
            .list_entities(application_id, &singularize(collection))?;

        let mut file = NamedTempFile::new()?;
        {
            let mut out = BufWriter::new(file.as_file_mut());
            out.write_all(b"[")?;
            for (i, entity) in entities.iter().enumerate() {
                if i > 0 {
                    out.write_all(b",\n")?;
                }
                serde_json::to_writer(&mut out, &self.record(application_id, entity)?)?;
            }
            out.write_all(b"]\n")?;
            out.flush()?;
        }
        store.put(&blob_name, file.path())?;

        self.storage.mutate("export_collection", actor, |_tx, ctx| {
            ctx.record_event(
                "collection",
                &format!("{application_id}/{collection}"),
                EventType::CollectionExported,
            );
            Ok(())
        })?;
        info!(blob = %blob_name, entities = entities.len(), "Exported collection");

        Ok(ExportSummary {
            blob_name,
            entities: entities.len(),
        })
    }

    fn record(&self, application_id: Uuid, entity: &Entity) -> Result<ExportRecord> {
        let mut metadata = entity.properties.clone();
        metadata.insert("uuid".into(), Value::String(entity.uuid.to_string()));
        metadata.insert("type".into(), Value::String(entity.entity_type.clone()));

        let mut connections: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        for (relation, target) in self.entities.connections_from(application_id, entity.uuid)? {
            connections.entry(relation).or_default().push(target);
        }

        let dictionaries = self
            .entities
            .dictionaries_of(application_id, entity.uuid)?
            .into_iter()
            .map(|(name, entries)| (name, Value::Object(entries)))
            .collect();

        Ok(ExportRecord {
            metadata,
            connections,
            dictionaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::testing::{FixedConnector, MemoryBlobStore};
    use crate::config::ImportSettings;
    use crate::import::coordinator::ImportCoordinator;
    use crate::model::{Application, ImportRequest, ImportScope, JobState, Organization, StorageInfo};
    use crate::storage::EntityRef;
    use serde_json::json;
    use std::sync::Arc;

    fn tenant(storage: &SqliteStorage) -> (Organization, Application) {
        let org = Organization::new("acme");
        storage.create_organization(&org, "test").unwrap();
        let app = Application::new(org.id, "shop");
        storage.create_application(&app, "test").unwrap();
        (org, app)
    }

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_export_writes_import_format() {
        let storage = SqliteStorage::open_memory().unwrap();
        let (org, app) = tenant(&storage);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        storage
            .create_entity(app.id, &Entity::new(a, "user", props(json!({"name": "ann"}))))
            .unwrap();
        storage
            .create_entity(app.id, &Entity::new(b, "user", Map::new()))
            .unwrap();
        storage
            .create_connection(app.id, &EntityRef::untyped(a), "likes", b)
            .unwrap();
        storage
            .merge_dictionary(app.id, a, "prefs", &props(json!({"theme": "dark"})))
            .unwrap();
        let blobs = MemoryBlobStore::default();

        let summary = CollectionExporter::new(&storage, &storage)
            .export(org.id, app.id, "users", &blobs, "test")
            .unwrap();

        assert_eq!(summary.entities, 2);
        assert!(summary.blob_name.starts_with("acme/shop.users."));
        FileNameCodec::for_scope("acme", Some("shop"), Some("users"))
            .unwrap()
            .validate(&summary.blob_name)
            .unwrap();

        let content: Value = serde_json::from_slice(&blobs.get(&summary.blob_name).unwrap()).unwrap();
        assert_eq!(content[0]["Metadata"]["uuid"], a.to_string());
        assert_eq!(content[0]["Metadata"]["name"], "ann");
        assert_eq!(content[0]["connections"]["likes"][0], b.to_string());
        assert_eq!(content[0]["dictionaries"]["prefs"]["theme"], "dark");
        assert!(content[1].get("connections").is_none());
    }

    #[test]
    fn test_export_then_import_reproduces_collection() {
        let source = SqliteStorage::open_memory().unwrap();
        let (org, app) = tenant(&source);
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            source
                .create_entity(app.id, &Entity::new(*id, "user", Map::new()))
                .unwrap();
        }
        for pair in ids.windows(2) {
            source
                .create_connection(app.id, &EntityRef::untyped(pair[0]), "follows", pair[1])
                .unwrap();
        }
        let blobs = Arc::new(MemoryBlobStore::default());
        CollectionExporter::new(&source, &source)
            .export(org.id, app.id, "users", blobs.as_ref(), "test")
            .unwrap();

        let target = SqliteStorage::open_memory().unwrap();
        let (target_org, target_app) = tenant(&target);
        let connector = FixedConnector(blobs.clone());
        let settings = ImportSettings::default();
        let coordinator = ImportCoordinator::new(&target, &target, &connector, &settings);
        let job = coordinator
            .schedule_request(
                ImportRequest {
                    scope: ImportScope::new(target_org.id, Some(target_app.id), Some("users".into()))
                        .unwrap(),
                    storage_provider: "memory".into(),
                    storage_info: StorageInfo {
                        bucket_location: "exports".into(),
                        ..StorageInfo::default()
                    },
                },
                "test",
            )
            .unwrap();
        coordinator.execute(job.id, "test").unwrap();
        let task = target.list_file_tasks(job.id).unwrap().remove(0);
        assert_eq!(
            coordinator.import_file(task.id, 1, &|| {}, "test").unwrap(),
            JobState::Finished
        );

        assert_eq!(target.count_entities(target_app.id).unwrap(), 5);
        assert_eq!(target.count_connections(target_app.id).unwrap(), 4);
        assert_eq!(
            target.connections_from(target_app.id, ids[2]).unwrap(),
            vec![("follows".to_string(), ids[3])]
        );
    }

    #[test]
    fn test_export_unknown_application() {
        let storage = SqliteStorage::open_memory().unwrap();
        let (org, _) = tenant(&storage);
        let err = CollectionExporter::new(&storage, &storage)
            .export(org.id, Uuid::new_v4(), "users", &MemoryBlobStore::default(), "test")
            .unwrap_err();
        assert!(matches!(err, Error::ApplicationNotFound { .. }));
    }
}
