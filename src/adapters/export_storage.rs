//! Removal of Dgraph exports from S3-compatible storage

use async_trait::async_trait;
use aws_credential_types::Credentials as AwsCredentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

use super::dgraph::S3Credentials;
use super::secrets::Credentials;

const DEFAULT_REGION: &str = "us-east-1";

/// Where an export lives in object storage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportLocation {
    /// Storage endpoint URL, e.g. https://s3.eu-central-1.amazonaws.com
    pub endpoint: String,
    pub bucket: String,
    /// Destination path below the bucket, may be empty
    pub prefix: String,
    /// Directory of the export below the prefix
    pub backup_dir: String,
}

impl ExportLocation {
    /// Derive the location from the export destination and the first exported file
    pub fn derive(destination: &str, exported_files: &[String]) -> Result<Self> {
        let url = Url::parse(destination)
            .map_err(|e| Error::storage(format!("failed to parse destination {:?}: {}", destination, e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::storage(format!("destination {:?} has no host", destination)))?;

        let scheme = if url.scheme() == "minio" { "http" } else { "https" };
        let endpoint = match url.port() {
            Some(port) => format!("{}://{}:{}", scheme, host, port),
            None => format!("{}://{}", scheme, host),
        };

        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty());
        let bucket = segments
            .next()
            .ok_or_else(|| Error::storage(format!("destination {:?} has no bucket", destination)))?
            .to_string();
        let prefix = segments.collect::<Vec<_>>().join("/");

        let first = exported_files
            .first()
            .ok_or_else(|| Error::storage("no exported files recorded"))?;
        let backup_dir = match first.trim_start_matches('/').rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir.to_string(),
            _ => {
                return Err(Error::storage(format!(
                    "cannot derive export directory from {:?}",
                    first
                )))
            }
        };

        Ok(Self {
            endpoint,
            bucket,
            prefix,
            backup_dir,
        })
    }

    /// Key prefix covering every object of the export
    pub fn key_prefix(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}/", self.backup_dir)
        } else {
            format!("{}/{}/", self.prefix, self.backup_dir)
        }
    }
}

/// Deletes exported backups from remote storage
#[async_trait]
pub trait ExportStorage: Send + Sync {
    /// Delete every object below the export's key prefix, returning the count
    async fn delete_export(
        &self,
        location: &ExportLocation,
        region: &str,
        credentials: &Credentials,
    ) -> Result<usize>;
}

/// [`ExportStorage`] on top of the AWS S3 SDK (path-style addressing)
#[derive(Clone, Debug, Default)]
pub struct S3ExportStorage;

impl S3ExportStorage {
    async fn client(
        location: &ExportLocation,
        region: &str,
        credentials: &Credentials,
    ) -> aws_sdk_s3::Client {
        let region = Region::new(if region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            region.to_string()
        });
        let s3 = S3Credentials::from_credentials(credentials);

        let mut builder = if s3.access_key.is_empty() {
            // No static keys: fall back to the ambient credential chain
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        } else {
            let session_token = Some(s3.session_token).filter(|t| !t.is_empty());
            aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(AwsCredentials::new(
                    s3.access_key,
                    s3.secret_key,
                    session_token,
                    None,
                    "backups-operator",
                ))
        };
        builder = builder
            .endpoint_url(location.endpoint.clone())
            .force_path_style(true);

        aws_sdk_s3::Client::from_conf(builder.build())
    }
}

#[async_trait]
impl ExportStorage for S3ExportStorage {
    async fn delete_export(
        &self,
        location: &ExportLocation,
        region: &str,
        credentials: &Credentials,
    ) -> Result<usize> {
        let client = Self::client(location, region, credentials).await;
        let prefix = location.key_prefix();

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = client
                .list_objects_v2()
                .bucket(&location.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| Error::storage(format!("failed to list {}: {}", prefix, DisplayErrorContext(&e))))?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        for key in &keys {
            debug!(bucket = %location.bucket, key = %key, "Deleting export object");
            client
                .delete_object()
                .bucket(&location.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| Error::storage(format!("failed to delete {}: {}", key, DisplayErrorContext(&e))))?;
        }

        info!(bucket = %location.bucket, prefix = %prefix, objects = keys.len(), "Deleted export");
        Ok(keys.len())
    }
}
