//! DgraphBackupSchedule Custom Resource Definition

use kube::{api::ObjectMeta, CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    inherited_annotations, schedule_labels, BackupScheduleResource, BackupScheduleStatus,
    DgraphBackup, DgraphBackupSpec,
};

/// DgraphBackupSchedule resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backups.sputnik.systems",
    version = "v1alpha1",
    kind = "DgraphBackupSchedule",
    plural = "dgraphbackupschedules",
    singular = "dgraphbackupschedule",
    shortname = "dgbs",
    namespaced,
    status = "BackupScheduleStatus",
    printcolumn = r#"{"name": "Schedule", "type": "string", "jsonPath": ".spec.schedule", "description": "backup objects creation schedule"}"#,
    printcolumn = r#"{"name": "Retention", "type": "string", "jsonPath": ".spec.retention", "description": "backup objects retention period"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DgraphBackupScheduleSpec {
    /// Cron expression (5 or 6 fields, or a descriptor such as @daily)
    pub schedule: String,

    /// How long spawned backups are kept, e.g. "168h"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub retention: String,

    /// Template for every spawned DgraphBackup
    pub backup: DgraphBackupSpec,
}

impl BackupScheduleResource for DgraphBackupSchedule {
    type Backup = DgraphBackup;

    const CONTROLLER: &'static str = "dgraphbackupschedule";

    fn cron(&self) -> &str {
        &self.spec.schedule
    }

    fn retention(&self) -> Option<&str> {
        Some(self.spec.retention.as_str()).filter(|r| !r.is_empty())
    }

    fn schedule_status(&self) -> Option<&BackupScheduleStatus> {
        self.status.as_ref()
    }

    fn schedule_status_mut(&mut self) -> &mut BackupScheduleStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn new_backup(&self, name: &str) -> DgraphBackup {
        DgraphBackup {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: self.namespace(),
                labels: Some(schedule_labels(
                    &self.name_any(),
                    self.uid().as_deref().unwrap_or_default(),
                )),
                annotations: inherited_annotations(self.metadata.annotations.as_ref()),
                ..Default::default()
            },
            spec: self.spec.backup.clone(),
            status: None,
        }
    }
}
