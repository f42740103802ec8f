//! clickhouse-backup REST API client

use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use reqwest::header::HOST;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info};

use crate::crd::ClickHouseBackup;
use crate::error::{Error, Result};

/// One row of `GET /backup/status`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ActionRow {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub finish: String,
    #[serde(default)]
    pub error: String,
}

/// One row of `GET /backup/list`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BackupEntry {
    pub name: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub required: String,
    #[serde(default)]
    pub desc: String,
}

/// Operations of the clickhouse-backup API used by the reconciler
#[async_trait]
pub trait ClickHouseApi: Send + Sync {
    /// Start creating a local backup named after the object
    async fn create(&self, backup: &ClickHouseBackup) -> Result<()>;

    /// Start uploading the local backup to remote storage
    async fn upload(&self, backup: &ClickHouseBackup) -> Result<()>;

    /// Status rows of all actions the service knows about
    async fn status(&self, backup: &ClickHouseBackup) -> Result<Vec<ActionRow>>;

    /// Delete the local and remote copies of the backup
    async fn delete(&self, backup: &ClickHouseBackup) -> Result<()>;
}

/// Rows whose command takes `name` as an argument, in service order
///
/// Matching is per whitespace-separated token, so `db-1` never claims the
/// rows of `prod-db-1`.
pub fn rows_for<'a>(name: &str, rows: &'a [ActionRow]) -> Vec<&'a ActionRow> {
    rows.iter()
        .filter(|row| row.command.split_whitespace().any(|arg| arg == name))
        .collect()
}

/// Parse a newline-delimited JSON body, skipping blank lines
pub fn parse_ndjson<T: DeserializeOwned>(body: &str) -> Result<Vec<T>> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(Error::from))
        .collect()
}

/// [`ClickHouseApi`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpClickHouseApi {
    http: reqwest::Client,
}

impl HttpClickHouseApi {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Base URL and Host header for calls about `backup`
    fn target(backup: &ClickHouseBackup) -> (String, Option<String>) {
        let api = backup.status.as_ref().map(|s| &s.api);
        match api {
            Some(api) if api.is_resolved() => (
                api.address.trim_end_matches('/').to_string(),
                Some(api.hostname.clone()).filter(|h| !h.is_empty()),
            ),
            _ => (backup.spec.api_address.trim_end_matches('/').to_string(), None),
        }
    }

    async fn post(
        &self,
        backup: &ClickHouseBackup,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<()> {
        let (base, host) = Self::target(backup);
        let mut request = self.http.post(format!("{}{}", base, path)).query(&query);
        if let Some(host) = host {
            request = request.header(HOST, host);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::adapter(format!(
                "POST {} returned {}: {}",
                path,
                status,
                body.trim()
            )));
        }
        Ok(())
    }

    async fn get_ndjson<T: DeserializeOwned>(
        &self,
        backup: &ClickHouseBackup,
        path: &str,
    ) -> Result<Vec<T>> {
        let (base, host) = Self::target(backup);
        let mut request = self.http.get(format!("{}{}", base, path));
        if let Some(host) = host {
            request = request.header(HOST, host);
        }

        let response = request.send().await?.error_for_status()?;
        parse_ndjson(&response.text().await?)
    }

    async fn list(&self, backup: &ClickHouseBackup) -> Result<Vec<BackupEntry>> {
        let name = backup.name_any();
        let entries: Vec<BackupEntry> = self.get_ndjson(backup, "/backup/list").await?;
        Ok(entries.into_iter().filter(|e| e.name == name).collect())
    }
}

#[async_trait]
impl ClickHouseApi for HttpClickHouseApi {
    async fn create(&self, backup: &ClickHouseBackup) -> Result<()> {
        let mut query: Vec<(String, String)> = backup
            .spec
            .create_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        query.push(("name".to_string(), backup.name_any()));

        self.post(backup, "/backup/create", query).await
    }

    async fn upload(&self, backup: &ClickHouseBackup) -> Result<()> {
        let query = backup
            .spec
            .upload_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        self.post(backup, &format!("/backup/upload/{}", backup.name_any()), query)
            .await
    }

    async fn status(&self, backup: &ClickHouseBackup) -> Result<Vec<ActionRow>> {
        self.get_ndjson(backup, "/backup/status").await
    }

    async fn delete(&self, backup: &ClickHouseBackup) -> Result<()> {
        let name = backup.name_any();

        for entry in self.list(backup).await? {
            let location = match entry.location.as_str() {
                "local" | "remote" => entry.location.as_str(),
                other => {
                    debug!(name = %name, location = other, "Skipping backup with unknown location");
                    continue;
                }
            };

            info!(name = %name, location, "Deleting clickhouse backup");
            self.post(
                backup,
                &format!("/backup/delete/{}/{}", location, name),
                Vec::new(),
            )
            .await?;
        }

        Ok(())
    }
}
