//! Custom Resource Definitions for the backups operator

mod backoff;
mod clickhouse_backup;
mod clickhouse_backup_schedule;
mod common;
mod dgraph_backup;
mod dgraph_backup_schedule;
mod phase;

pub use backoff::*;
pub use clickhouse_backup::*;
pub use clickhouse_backup_schedule::*;
pub use common::*;
pub use dgraph_backup::*;
pub use dgraph_backup_schedule::*;
pub use phase::*;

use kube::CustomResourceExt;

use crate::store::StoredObject;

/// A schedule spawning backup requests of kind `Backup`
pub trait BackupScheduleResource: StoredObject {
    /// Kind of backup request spawned on every tick
    type Backup: StoredObject;

    /// Controller label used in metrics
    const CONTROLLER: &'static str;

    /// Cron expression of the creation job
    fn cron(&self) -> &str;

    /// Retention duration string, `None` when backups are kept forever
    fn retention(&self) -> Option<&str>;

    fn schedule_status(&self) -> Option<&BackupScheduleStatus>;

    fn schedule_status_mut(&mut self) -> &mut BackupScheduleStatus;

    /// Build a new backup request from the schedule's template
    fn new_backup(&self, name: &str) -> Self::Backup;
}

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![
        serde_yaml::to_string(&ClickHouseBackup::crd())?,
        serde_yaml::to_string(&ClickHouseBackupSchedule::crd())?,
        serde_yaml::to_string(&DgraphBackup::crd())?,
        serde_yaml::to_string(&DgraphBackupSchedule::crd())?,
    ])
}
