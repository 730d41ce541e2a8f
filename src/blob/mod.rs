//! Blob storage access for imports and exports.
//!
//! A [`BlobStore`] is a flat namespace of `/`-separated names supporting
//! list, download and put. [`BlobConnector`] turns a job's storage provider
//! and [`StorageInfo`] into a store, and [`BlobSource`] discovers the files
//! an import scope covers.
//!
//! Connectivity failures surface as `Error::StorageUnavailable` and are not
//! retried here; the scheduler owns retry policy.

pub mod local;
pub mod s3;

use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::import::naming::{FileDescriptor, FileNameCodec};
use crate::model::StorageInfo;

pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

/// Object store interface.
pub trait BlobStore: Send + Sync {
    /// Names starting with `prefix`, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the store cannot be reached.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Fetch a blob into a local temporary file.
    ///
    /// The download either completes or fails; a partial file is never
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the blob cannot be fetched.
    fn download(&self, name: &str) -> Result<NamedTempFile>;

    /// Upload a local file under `name`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the upload fails.
    fn put(&self, name: &str, path: &Path) -> Result<()>;
}

/// Builds blob stores from job storage settings.
pub trait BlobConnector: Send + Sync {
    /// Open the store for `provider`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unknown providers or incomplete settings.
    fn connect(&self, provider: &str, info: &StorageInfo) -> Result<Arc<dyn BlobStore>>;
}

/// Connector for the built-in `s3` and `local` providers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

impl BlobConnector for DefaultConnector {
    fn connect(&self, provider: &str, info: &StorageInfo) -> Result<Arc<dyn BlobStore>> {
        match provider.to_ascii_lowercase().as_str() {
            "s3" => Ok(Arc::new(S3BlobStore::from_info(info)?)),
            "local" => Ok(Arc::new(LocalBlobStore::new(&info.bucket_location)?)),
            other => Err(Error::InvalidArgument(format!(
                "unknown storage provider '{other}' (expected s3 or local)"
            ))),
        }
    }
}

/// Discovers and fetches the files belonging to an import scope.
pub struct BlobSource {
    store: Arc<dyn BlobStore>,
    max_files: usize,
}

impl BlobSource {
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, max_files: usize) -> Self {
        Self { store, max_files }
    }

    /// List the `.json` files under the codec's prefix, validated and sorted
    /// by name, capped at the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if listing fails, or `MalformedFileName`
    /// if a candidate does not follow the naming convention for the scope.
    pub fn discover(&self, codec: &FileNameCodec) -> Result<Vec<FileDescriptor>> {
        let prefix = codec.prefix();
        let mut names: Vec<String> = self
            .store
            .list(&prefix)?
            .into_iter()
            .filter(|name| name.starts_with(&prefix) && name.ends_with(".json"))
            .collect();
        names.sort();
        names.dedup();

        if names.len() > self.max_files {
            warn!(
                prefix = %prefix,
                found = names.len(),
                max = self.max_files,
                "Too many files, importing only the first ones"
            );
            names.truncate(self.max_files);
        }

        let files = names
            .iter()
            .map(|name| codec.validate(name))
            .collect::<Result<Vec<_>>>()?;
        debug!(prefix = %prefix, files = files.len(), "Discovered import files");
        Ok(files)
    }

    /// Fetch one discovered file.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the download fails.
    pub fn download(&self, name: &str) -> Result<NamedTempFile> {
        self.store.download(name)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryBlobStore;
    use super::*;

    fn source(store: &Arc<MemoryBlobStore>, max: usize) -> BlobSource {
        BlobSource::new(store.clone(), max)
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let store = Arc::new(MemoryBlobStore::default());
        store.insert("acme/shop.users.2.json", "[]");
        store.insert("acme/shop.users.1.json", "[]");
        store.insert("acme/shop.users.1.csv", "");
        store.insert("acme/shop.pets.1.json", "[]");
        store.insert("other/shop.users.1.json", "[]");

        let codec = FileNameCodec::for_scope("acme", Some("shop"), Some("users")).unwrap();
        let names: Vec<String> = source(&store, 10)
            .discover(&codec)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["acme/shop.users.1.json", "acme/shop.users.2.json"]);
    }

    #[test]
    fn test_discover_caps_file_count() {
        let store = Arc::new(MemoryBlobStore::default());
        for i in 0..5 {
            store.insert(&format!("acme/shop.users.{i}.json"), "[]");
        }
        let codec = FileNameCodec::for_scope("acme", Some("shop"), Some("users")).unwrap();
        assert_eq!(source(&store, 3).discover(&codec).unwrap().len(), 3);
    }

    #[test]
    fn test_discover_rejects_malformed_candidate() {
        let store = Arc::new(MemoryBlobStore::default());
        store.insert("acme/shop.users.latest.json", "[]");
        let codec = FileNameCodec::for_scope("acme", Some("shop"), Some("users")).unwrap();
        let err = source(&store, 10).discover(&codec).unwrap_err();
        assert!(matches!(err, Error::MalformedFileName { .. }));
    }

    #[test]
    fn test_discover_surfaces_unavailable() {
        let store = Arc::new(MemoryBlobStore::default());
        store.set_unavailable(true);
        let codec = FileNameCodec::for_scope("acme", None, None).unwrap();
        let err = source(&store, 10).discover(&codec).unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_download_fetches_whole_blob() {
        let store = Arc::new(MemoryBlobStore::default());
        store.insert("acme/shop.users.1.json", "[{}]");
        let file = source(&store, 10).download("acme/shop.users.1.json").unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "[{}]");

        store.set_unavailable(true);
        let err = source(&store, 10)
            .download("acme/shop.users.1.json")
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_default_connector_rejects_unknown_provider() {
        let info = StorageInfo {
            bucket_location: "x".into(),
            ..StorageInfo::default()
        };
        let err = DefaultConnector.connect("gcs", &info).err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
