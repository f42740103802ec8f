//! DgraphBackup Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Phase;

/// DgraphBackup resource specification
///
/// One synchronous export of a Dgraph cluster to S3-compatible storage.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backups.sputnik.systems",
    version = "v1alpha1",
    kind = "DgraphBackup",
    plural = "dgraphbackups",
    singular = "dgraphbackup",
    shortname = "dgb",
    namespaced,
    status = "DgraphBackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase", "description": "backup creation phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DgraphBackupSpec {
    /// Dgraph alpha admin endpoint, e.g. http://dgraph-alpha:8080/admin
    pub admin_url: String,

    /// Exported Dgraph namespace
    #[serde(default)]
    pub namespace: i64,

    /// Export file format (rdf, json)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// Export destination, e.g. s3://s3.eu-central-1.amazonaws.com/bucket/dgraph
    pub destination: String,

    /// Storage region
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    /// Secrets merged into the export credentials, later entries win
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    /// Export without credentials
    #[serde(default)]
    pub anonymous: bool,
}

/// DgraphBackup status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DgraphBackupStatus {
    /// Current phase of the export
    #[serde(default)]
    pub phase: Phase,

    /// Response of the export mutation
    #[serde(default)]
    pub export_response: DgraphExportResponse,

    /// Last failure message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Result of a Dgraph export call
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DgraphExportResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,

    /// Exported files relative to the destination
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exported_files: Vec<String>,
}

impl DgraphBackup {
    /// Current phase, `Unstarted` when no status was written yet
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut DgraphBackupStatus {
        self.status.get_or_insert_with(Default::default)
    }

    /// Exported files recorded by a completed export
    pub fn exported_files(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.export_response.exported_files.as_slice())
            .unwrap_or_default()
    }
}
