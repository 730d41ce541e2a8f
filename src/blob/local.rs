//! Filesystem-backed blob store: a directory acts as the bucket.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::blob::BlobStore;
use crate::error::{Error, Result};

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

fn unavailable(op: &str, name: &str, err: &io::Error) -> Error {
    Error::StorageUnavailable(format!("{op} {name}: {err}"))
}

impl LocalBlobStore {
    /// Open (without creating) the bucket directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the location is empty.
    pub fn new(location: &str) -> Result<Self> {
        if location.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "bucket_location is required for local storage".into(),
            ));
        }
        Ok(Self {
            root: PathBuf::from(location),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject names that could escape the bucket root.
    fn validate_name(name: &str) -> Result<()> {
        let reason = if name.is_empty() {
            Some("empty")
        } else if name.starts_with('/') || name.starts_with('\\') {
            Some("absolute path")
        } else if name.contains('\\') {
            Some("contains backslash")
        } else if Path::new(name)
            .components()
            .any(|c| c == Component::ParentDir)
        {
            Some("parent traversal")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::InvalidArgument(format!(
                "unsafe blob name '{name}': {reason}"
            ))),
            None => Ok(()),
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        Self::validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn list_recursive(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(unavailable("LIST", &dir.display().to_string(), &e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| unavailable("LIST", &dir.display().to_string(), &e))?;
            let path = entry.path();
            if path.is_dir() {
                self.list_recursive(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
        Ok(())
    }
}

impl BlobStore for LocalBlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(Error::StorageUnavailable(format!(
                "bucket directory {} does not exist",
                self.root.display()
            )));
        }
        // Only walk the directory part of the prefix.
        let dir = match prefix.rfind('/') {
            Some(idx) => self.resolve(&prefix[..idx])?,
            None => self.root.clone(),
        };
        let mut names = Vec::new();
        self.list_recursive(&dir, &mut names)?;
        names.retain(|n| n.starts_with(prefix));
        Ok(names)
    }

    fn download(&self, name: &str) -> Result<NamedTempFile> {
        let path = self.resolve(name)?;
        let mut source = fs::File::open(&path).map_err(|e| unavailable("GET", name, &e))?;
        let mut tmp = NamedTempFile::new()?;
        io::copy(&mut source, &mut tmp).map_err(|e| unavailable("GET", name, &e))?;
        Ok(tmp)
    }

    fn put(&self, name: &str, path: &Path) -> Result<()> {
        let target = self.resolve(name)?;
        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| unavailable("PUT", name, &e))?;

        // Copy beside the target, then rename into place.
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| unavailable("PUT", name, &e))?;
        let mut source = fs::File::open(path)?;
        io::copy(&mut source, &mut tmp).map_err(|e| unavailable("PUT", name, &e))?;
        tmp.persist(&target)
            .map_err(|e| unavailable("PUT", name, &e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn write(root: &Path, name: &str, body: &str) {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_list_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "acme/shop.users.1.json", "[]");
        write(dir.path(), "acme/shop.pets.1.json", "[]");
        write(dir.path(), "other/shop.users.1.json", "[]");

        let store = LocalBlobStore::new(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(
            store.list("acme/shop.users.").unwrap(),
            vec!["acme/shop.users.1.json".to_string()]
        );
        let mut all = store.list("").unwrap();
        all.sort();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_missing_bucket_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("nope").to_str().unwrap()).unwrap();
        assert!(matches!(store.list("acme/"), Err(Error::StorageUnavailable(_))));
    }

    #[test]
    fn test_put_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_str().unwrap()).unwrap();

        let mut src = NamedTempFile::new().unwrap();
        src.write_all(b"[1,2,3]").unwrap();
        store.put("acme/shop.users.9.json", src.path()).unwrap();

        let mut fetched = store.download("acme/shop.users.9.json").unwrap().reopen().unwrap();
        let mut body = String::new();
        fetched.read_to_string(&mut body).unwrap();
        assert_eq!(body, "[1,2,3]");
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_str().unwrap()).unwrap();
        assert!(store.download("../etc/passwd").is_err());
        assert!(store.download("/etc/passwd").is_err());
        assert!(store.download("a\\b").is_err());
    }

    #[test]
    fn test_download_missing_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_str().unwrap()).unwrap();
        assert!(matches!(
            store.download("acme/shop.users.1.json"),
            Err(Error::StorageUnavailable(_))
        ));
    }
}
