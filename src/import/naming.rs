//! Blob naming convention.
//!
//! ```text
//! <org>/<app>.<collection>.<seq>.json   collection scope
//! <org>/<app>.<seq>.json                application scope
//! <org>/<seq>.json                      organization scope
//! ```

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::ScopeKind;

/// A parsed blob name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub name: String,
    pub organization: String,
    pub application: Option<String>,
    pub collection: Option<String>,
    pub sequence: String,
}

impl FileDescriptor {
    /// Scope level encoded in the name.
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match (&self.application, &self.collection) {
            (Some(_), Some(_)) => ScopeKind::Collection,
            (Some(_), None) => ScopeKind::Application,
            (None, _) => ScopeKind::Organization,
        }
    }
}

/// Generates and validates blob names for one import scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameCodec {
    organization: String,
    application: Option<String>,
    collection: Option<String>,
}

fn check_segment(label: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains(['.', '/']) {
        return Err(Error::InvalidScope(format!(
            "{label} name '{value}' cannot be used in a file name"
        )));
    }
    Ok(())
}

fn malformed(name: &str, reason: &str) -> Error {
    Error::MalformedFileName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

impl FileNameCodec {
    /// Codec for the scope named by these tenant and collection names.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScope` if a collection is given without an
    /// application, or a name cannot be embedded in a file name.
    pub fn for_scope(
        organization: &str,
        application: Option<&str>,
        collection: Option<&str>,
    ) -> Result<Self> {
        check_segment("organization", organization)?;
        if let Some(app) = application {
            check_segment("application", app)?;
        }
        if let Some(coll) = collection {
            if application.is_none() {
                return Err(Error::InvalidScope(
                    "a collection scope requires an application".to_string(),
                ));
            }
            check_segment("collection", coll)?;
        }
        Ok(Self {
            organization: organization.to_string(),
            application: application.map(ToString::to_string),
            collection: collection.map(ToString::to_string),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match (&self.application, &self.collection) {
            (Some(_), Some(_)) => ScopeKind::Collection,
            (Some(_), None) => ScopeKind::Application,
            (None, _) => ScopeKind::Organization,
        }
    }

    /// Listing prefix covering every file of this scope.
    #[must_use]
    pub fn prefix(&self) -> String {
        match (&self.application, &self.collection) {
            (Some(app), Some(coll)) => format!("{}/{app}.{coll}.", self.organization),
            (Some(app), None) => format!("{}/{app}.", self.organization),
            (None, _) => format!("{}/", self.organization),
        }
    }

    /// The name of the file with the given sequence number.
    #[must_use]
    pub fn file_name(&self, sequence: u64) -> String {
        format!("{}{sequence}.json", self.prefix())
    }

    /// Parse any name following the convention.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFileName` with the reason the name was rejected.
    pub fn parse(name: &str) -> Result<FileDescriptor> {
        let (organization, rest) = name
            .split_once('/')
            .ok_or_else(|| malformed(name, "missing '<organization>/' prefix"))?;
        if organization.is_empty() {
            return Err(malformed(name, "empty organization segment"));
        }
        let stem = rest
            .strip_suffix(".json")
            .ok_or_else(|| malformed(name, "expected a .json extension"))?;
        if stem.contains('/') {
            return Err(malformed(name, "unexpected '/' after the organization"));
        }

        let segments: Vec<&str> = stem.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(malformed(name, "empty segment"));
        }
        let (application, collection, sequence) = match segments.as_slice() {
            [seq] => (None, None, *seq),
            [app, seq] => (Some(*app), None, *seq),
            [app, coll, seq] => (Some(*app), Some(*coll), *seq),
            _ => return Err(malformed(name, "too many '.' separated segments")),
        };
        if !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed(name, "sequence number is not numeric"));
        }

        Ok(FileDescriptor {
            name: name.to_string(),
            organization: organization.to_string(),
            application: application.map(ToString::to_string),
            collection: collection.map(ToString::to_string),
            sequence: sequence.to_string(),
        })
    }

    /// Parse `name` and check that it belongs to this codec's scope.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFileName` if the name does not parse, lacks a
    /// segment the scope requires, or names a different tenant or collection.
    pub fn validate(&self, name: &str) -> Result<FileDescriptor> {
        let descriptor = Self::parse(name)?;

        if descriptor.organization != self.organization {
            return Err(malformed(
                name,
                &format!("belongs to organization '{}'", descriptor.organization),
            ));
        }
        if let Some(app) = &self.application {
            match &descriptor.application {
                None => return Err(malformed(name, "application segment is required")),
                Some(found) if found != app => {
                    return Err(malformed(name, &format!("belongs to application '{found}'")));
                }
                Some(_) => {}
            }
        }
        if let Some(coll) = &self.collection {
            match &descriptor.collection {
                None => {
                    return Err(malformed(
                        name,
                        "collection segment is required for a collection import",
                    ));
                }
                Some(found) if found != coll => {
                    return Err(malformed(name, &format!("belongs to collection '{found}'")));
                }
                Some(_) => {}
            }
        }
        Ok(descriptor)
    }
}

/// Entity type implied by a collection name (`users` -> `user`).
#[must_use]
pub fn singularize(collection: &str) -> String {
    if let Some(stem) = collection.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    if collection.len() > 1 && collection.ends_with('s') && !collection.ends_with("ss") {
        return collection[..collection.len() - 1].to_string();
    }
    collection.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        let coll = FileNameCodec::for_scope("acme", Some("shop"), Some("users")).unwrap();
        let app = FileNameCodec::for_scope("acme", Some("shop"), None).unwrap();
        let org = FileNameCodec::for_scope("acme", None, None).unwrap();

        assert_eq!(coll.prefix(), "acme/shop.users.");
        assert_eq!(app.prefix(), "acme/shop.");
        assert_eq!(org.prefix(), "acme/");
        assert_eq!(coll.file_name(3), "acme/shop.users.3.json");
        assert_eq!(coll.kind(), ScopeKind::Collection);
        assert_eq!(org.kind(), ScopeKind::Organization);
    }

    #[test]
    fn test_parse_each_form() {
        let d = FileNameCodec::parse("acme/shop.users.12.json").unwrap();
        assert_eq!(d.organization, "acme");
        assert_eq!(d.application.as_deref(), Some("shop"));
        assert_eq!(d.collection.as_deref(), Some("users"));
        assert_eq!(d.sequence, "12");

        let d = FileNameCodec::parse("acme/shop.4.json").unwrap();
        assert_eq!(d.kind(), ScopeKind::Application);

        let d = FileNameCodec::parse("acme/7.json").unwrap();
        assert_eq!(d.kind(), ScopeKind::Organization);
    }

    #[test]
    fn test_parse_rejects() {
        for bad in [
            "shop.users.1.json",
            "/shop.users.1.json",
            "acme/shop.users.1.txt",
            "acme/shop..1.json",
            "acme/a.b.c.1.json",
            "acme/shop.users.one.json",
            "acme/sub/shop.users.1.json",
        ] {
            assert!(
                matches!(FileNameCodec::parse(bad), Err(Error::MalformedFileName { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_collection_scope_requires_collection_segment() {
        let codec = FileNameCodec::for_scope("acme", Some("shop"), Some("users")).unwrap();
        let err = codec.validate("acme/shop.1.json").unwrap_err();
        assert!(err.to_string().contains("collection segment is required"));
    }

    #[test]
    fn test_validate_checks_tenant() {
        let codec = FileNameCodec::for_scope("acme", Some("shop"), Some("users")).unwrap();
        assert!(codec.validate("acme/shop.users.1.json").is_ok());
        assert!(codec.validate("other/shop.users.1.json").is_err());
        assert!(codec.validate("acme/blog.users.1.json").is_err());
        assert!(codec.validate("acme/shop.pets.1.json").is_err());
    }

    #[test]
    fn test_for_scope_rejects_bad_names() {
        assert!(FileNameCodec::for_scope("ac.me", None, None).is_err());
        assert!(FileNameCodec::for_scope("acme", None, Some("users")).is_err());
        assert!(FileNameCodec::for_scope("acme", Some("sh/op"), None).is_err());
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("activities"), "activity");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("s"), "s");
    }
}
