//! ClickHouseBackup Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ExponentialBackOffSpec, Phase};

/// ClickHouseBackup resource specification
///
/// One backup taken through a clickhouse-backup REST API: created locally,
/// then uploaded to the remote storage configured on the ClickHouse side.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backups.sputnik.systems",
    version = "v1alpha1",
    kind = "ClickHouseBackup",
    plural = "clickhousebackups",
    singular = "clickhousebackup",
    shortname = "chb",
    namespaced,
    status = "ClickHouseBackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase", "description": "backup creation phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseBackupSpec {
    /// clickhouse-backup API URL, e.g. http://clickhouse:7171
    pub api_address: String,

    /// Backoff settings for the create/upload status polling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exponential_back_off: Option<ExponentialBackOffSpec>,

    /// Extra query parameters for the create call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub create_params: BTreeMap<String, String>,

    /// Extra query parameters for the upload call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub upload_params: BTreeMap<String, String>,
}

/// ClickHouseBackup status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseBackupStatus {
    /// Current phase of the backup workflow
    #[serde(default)]
    pub phase: Phase,

    /// Resolved endpoint the requests are sent to
    #[serde(default)]
    pub api: ClickHouseApiEndpoint,

    /// Last failure message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Resolved clickhouse-backup endpoint
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ClickHouseApiEndpoint {
    /// URL with the host replaced by its IP address
    #[serde(rename = "Address", default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    /// Hostname sent as the Host header
    #[serde(rename = "Hostname", default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

impl ClickHouseApiEndpoint {
    pub fn is_resolved(&self) -> bool {
        !self.address.is_empty()
    }
}

impl ClickHouseBackup {
    /// Current phase, `Unstarted` when no status was written yet
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Mutable status, created on first access
    pub fn status_mut(&mut self) -> &mut ClickHouseBackupStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
