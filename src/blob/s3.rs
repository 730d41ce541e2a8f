//! S3-compatible blob store using presigned requests.
//!
//! Requests are signed with `rusty-s3` and sent with a blocking `reqwest`
//! client. Every transport failure or non-success status maps to
//! `Error::StorageUnavailable` with the original message preserved.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use rusty_s3::actions::{ListObjectsV2, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::model::StorageInfo;

/// Duration for presigned URL validity.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3BlobStore {
    bucket: Bucket,
    credentials: Credentials,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("bucket", &self.bucket.name())
            .finish_non_exhaustive()
    }
}

fn unavailable(op: &str, name: &str, err: impl std::fmt::Display) -> Error {
    Error::StorageUnavailable(format!("S3 {op} {name}: {err}"))
}

impl S3BlobStore {
    /// Build a store from job storage settings.
    ///
    /// `bucket_location` is the bucket name. Without an explicit endpoint the
    /// regional AWS endpoint is used.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the bucket or credentials are missing or
    /// the endpoint is not a URL.
    pub fn from_info(info: &StorageInfo) -> Result<Self> {
        let bucket_name = info.bucket_location.trim();
        if bucket_name.is_empty() {
            return Err(Error::InvalidArgument(
                "bucket_location is required for s3 storage".into(),
            ));
        }
        let (Some(access_id), Some(secret_key)) = (&info.access_id, &info.secret_key) else {
            return Err(Error::InvalidArgument(
                "access_id and secret_key are required for s3 storage".into(),
            ));
        };
        let region = info.region.as_deref().unwrap_or(DEFAULT_REGION);
        let endpoint = info
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{region}.amazonaws.com"));

        Self::new(&endpoint, bucket_name, region, access_id, secret_key)
    }

    /// Build a store for an explicit endpoint, using path-style addressing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the endpoint or bucket name is invalid,
    /// or `StorageUnavailable` if the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        bucket_name: &str,
        region: &str,
        access_id: &str,
        secret_key: &str,
    ) -> Result<Self> {
        let base_url = endpoint.parse().map_err(|e| {
            Error::InvalidArgument(format!("invalid S3 endpoint URL '{endpoint}': {e}"))
        })?;
        let bucket = Bucket::new(
            base_url,
            UrlStyle::Path,
            bucket_name.to_string(),
            region.to_string(),
        )
        .map_err(|e| Error::InvalidArgument(format!("invalid S3 bucket '{bucket_name}': {e}")))?;

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| unavailable("CLIENT", bucket_name, e))?;

        Ok(Self {
            bucket,
            credentials: Credentials::new(access_id, secret_key),
            client,
        })
    }

    fn send(
        &self,
        op: &str,
        name: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response> {
        let response = request.send().map_err(|e| unavailable(op, name, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(op, name, format!("HTTP {status}")));
        }
        Ok(response)
    }
}

impl BlobStore for S3BlobStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action.query_mut().insert("prefix", prefix);
            if let Some(ref token) = continuation_token {
                action.query_mut().insert("continuation-token", token);
            }
            let url = action.sign(PRESIGN_DURATION);

            let body = self
                .send("LIST", prefix, self.client.get(url.as_str()))?
                .bytes()
                .map_err(|e| unavailable("LIST", prefix, e))?;
            let parsed = ListObjectsV2::parse_response(&body)
                .map_err(|e| unavailable("LIST", prefix, format!("bad response: {e}")))?;

            keys.extend(
                parsed
                    .contents
                    .iter()
                    .filter(|obj| !obj.key.ends_with('/'))
                    .map(|obj| obj.key.clone()),
            );

            match parsed.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        debug!(prefix, keys = keys.len(), "Listed S3 objects");
        Ok(keys)
    }

    fn download(&self, name: &str) -> Result<NamedTempFile> {
        let url = self
            .bucket
            .get_object(Some(&self.credentials), name)
            .sign(PRESIGN_DURATION);
        let mut response = self.send("GET", name, self.client.get(url.as_str()))?;

        let mut tmp = NamedTempFile::new()?;
        response
            .copy_to(&mut tmp)
            .map_err(|e| unavailable("GET", name, e))?;
        Ok(tmp)
    }

    fn put(&self, name: &str, path: &Path) -> Result<()> {
        let url = self
            .bucket
            .put_object(Some(&self.credentials), name)
            .sign(PRESIGN_DURATION);
        let file = File::open(path)?;
        self.send("PUT", name, self.client.put(url.as_str()).body(file))?;
        Ok(())
    }
}
