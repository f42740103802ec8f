//! Types and constants shared by all backup kinds

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of every resource managed by the operator
pub const API_GROUP: &str = "backups.sputnik.systems";

/// Finalizer blocking removal until remote cleanup has run
pub const FINALIZER_NAME: &str = "backups.sputnik.systems/finalizer";

/// Label carrying the name of the schedule that spawned a backup
pub const SCHEDULE_NAME_LABEL: &str = "backups.sputnik.systems/schedule";

/// Label carrying the UID of the schedule that spawned a backup
pub const SCHEDULE_UID_LABEL: &str = "backups.sputnik.systems/schedule-uid";

const KUBECTL_ANNOTATION_PREFIX: &str = "kubectl.kubernetes.io/";

/// Observed state shared by all backup schedules
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleStatus {
    /// Scheduler handle of the backup creation job (0 = none)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub schedule_task_id: u64,

    /// Scheduler handle of the retention job (0 = none)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retention_task_id: u64,

    /// Generation the jobs were registered for
    #[serde(default)]
    pub active_generation: i64,

    /// Time of the last successful registration
    #[serde(
        default,
        rename = "updatedTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Annotations a spawned backup inherits from its schedule
pub fn inherited_annotations(
    annotations: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let inherited: BTreeMap<String, String> = annotations?
        .iter()
        .filter(|(key, _)| !key.starts_with(KUBECTL_ANNOTATION_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    (!inherited.is_empty()).then_some(inherited)
}

/// Labels linking a spawned backup back to its schedule
pub fn schedule_labels(name: &str, uid: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SCHEDULE_NAME_LABEL.to_string(), name.to_string()),
        (SCHEDULE_UID_LABEL.to_string(), uid.to_string()),
    ])
}
