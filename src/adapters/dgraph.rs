//! Dgraph admin GraphQL client

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::crd::DgraphBackupSpec;
use crate::error::{Error, Result};

use super::secrets::Credentials;

const EXPORT_MUTATION: &str = r#"mutation Export($input: ExportInput!) {
  export(input: $input) {
    response { message code }
    exportedFiles
  }
}"#;

/// Result of a Dgraph export
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutput {
    #[serde(default)]
    pub response: ExportResponse,
    #[serde(default)]
    pub exported_files: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
}

/// Synchronous export operation of a Dgraph alpha
#[async_trait]
pub trait DgraphApi: Send + Sync {
    /// Run an export of `spec` and wait for its result; `admin_url` is the
    /// already resolved admin endpoint
    async fn export(
        &self,
        admin_url: &str,
        spec: &DgraphBackupSpec,
        credentials: &Credentials,
    ) -> Result<ExportOutput>;
}

/// S3 credential triple taken from merged secret data
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
}

impl S3Credentials {
    pub fn from_credentials(credentials: &Credentials) -> Self {
        let value = |key: &str| credentials.get(key).cloned().unwrap_or_default();
        Self {
            access_key: value("accessKey"),
            secret_key: value("secretKey"),
            session_token: value("sessionToken"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportInput<'a> {
    format: &'a str,
    namespace: i64,
    destination: &'a str,
    access_key: &'a str,
    secret_key: &'a str,
    session_token: &'a str,
    anonymous: bool,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ExportData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct ExportData {
    export: Option<ExportOutput>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// [`DgraphApi`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpDgraphApi {
    http: reqwest::Client,
}

impl HttpDgraphApi {
    /// Exports run synchronously and may take far longer than a status call,
    /// so only connecting is bounded unless `export_timeout` is set
    pub fn new(connect_timeout: Duration, export_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(connect_timeout);
        if let Some(timeout) = export_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }
}

/// Build the GraphQL request body of an export
fn export_request(spec: &DgraphBackupSpec, credentials: &S3Credentials) -> serde_json::Value {
    let input = ExportInput {
        format: &spec.format,
        namespace: spec.namespace,
        destination: &spec.destination,
        access_key: &credentials.access_key,
        secret_key: &credentials.secret_key,
        session_token: &credentials.session_token,
        anonymous: spec.anonymous,
    };

    json!({
        "query": EXPORT_MUTATION,
        "variables": { "input": input },
    })
}

fn export_output(response: GraphQlResponse) -> Result<ExportOutput> {
    if !response.errors.is_empty() {
        let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(Error::adapter(messages.join("; ")));
    }

    response
        .data
        .and_then(|data| data.export)
        .ok_or_else(|| Error::adapter("export mutation returned no data"))
}

#[async_trait]
impl DgraphApi for HttpDgraphApi {
    async fn export(
        &self,
        admin_url: &str,
        spec: &DgraphBackupSpec,
        credentials: &Credentials,
    ) -> Result<ExportOutput> {
        let body = export_request(spec, &S3Credentials::from_credentials(credentials));

        let response = self
            .http
            .post(admin_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        export_output(response.json().await?)
    }
}
