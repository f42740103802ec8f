//! Jobs registered by backup schedules
//!
//! Tasks carry a snapshot of what they need, so the scheduler holds no
//! reference to the schedule object and a running task never writes to it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{error, info, warn};

use crate::crd::{BackupScheduleResource, SCHEDULE_UID_LABEL};
use crate::error::{Error, Result};
use crate::metrics;
use crate::scheduler::Job;
use crate::store::{ObjectStore, StoredObject};

/// Creates one backup request per tick
pub struct CreateBackupTask<S: BackupScheduleResource> {
    schedule: S,
    store: Arc<dyn ObjectStore<S::Backup>>,
}

impl<S: BackupScheduleResource> CreateBackupTask<S> {
    pub fn new(schedule: S, store: Arc<dyn ObjectStore<S::Backup>>) -> Self {
        Self { schedule, store }
    }

    /// Name of the request spawned at `now`
    pub fn backup_name(&self, now: DateTime<Utc>) -> String {
        format!("{}-{}", self.schedule.name_any(), now.timestamp())
    }

    /// Create the request for the tick at `now`
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<S::Backup> {
        let backup = self.schedule.new_backup(&self.backup_name(now));
        let created = self.store.create(&backup).await?;

        info!(
            schedule = %self.schedule.name_any(),
            backup = %created.name_any(),
            namespace = created.namespace().as_deref().unwrap_or("default"),
            "Created scheduled backup"
        );
        Ok(created)
    }
}

#[async_trait]
impl<S: BackupScheduleResource> Job for CreateBackupTask<S> {
    async fn run(&self) {
        if let Err(e) = self.execute(Utc::now()).await {
            let name = self.schedule.name_any();
            let namespace = self.schedule.namespace().unwrap_or_default();
            error!(schedule = %name, namespace = %namespace, error = %e, "Scheduled backup creation failed");
            metrics::record_task_failure(&name, &namespace, S::CONTROLLER, "create");
        }
    }
}

/// Deletes requests spawned by one schedule once they are older than the retention
pub struct RetentionTask<B: StoredObject> {
    schedule_name: String,
    schedule_uid: String,
    namespace: String,
    controller: &'static str,
    retention: Duration,
    store: Arc<dyn ObjectStore<B>>,
}

impl<B: StoredObject> RetentionTask<B> {
    pub fn new<S>(schedule: &S, retention: Duration, store: Arc<dyn ObjectStore<B>>) -> Self
    where
        S: BackupScheduleResource<Backup = B>,
    {
        Self {
            schedule_name: schedule.name_any(),
            schedule_uid: schedule.uid().unwrap_or_default(),
            namespace: schedule.namespace().unwrap_or_else(|| "default".to_string()),
            controller: S::CONTROLLER,
            retention,
            store,
        }
    }

    fn owned(&self, backup: &B) -> bool {
        !self.schedule_uid.is_empty()
            && backup.labels().get(SCHEDULE_UID_LABEL) == Some(&self.schedule_uid)
    }

    /// Delete expired requests as of `now`, returning how many were deleted
    ///
    /// Every expired request is attempted; individual failures are logged
    /// and reported together once the pass is over.
    pub async fn execute(&self, now: DateTime<Utc>) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| Error::schedule(format!("retention out of range: {}", e)))?;
        let cutoff = now - retention;

        let expired: Vec<B> = self
            .store
            .list(&self.namespace)
            .await?
            .into_iter()
            .filter(|backup| self.owned(backup))
            .filter(|backup| backup.creation_timestamp().is_some_and(|t| t.0 < cutoff))
            .collect();

        let mut deleted = 0;
        let mut failed = 0;
        for backup in &expired {
            match self.store.delete(backup).await {
                Ok(()) => {
                    info!(schedule = %self.schedule_name, backup = %backup.name_any(), "Deleted expired backup");
                    deleted += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(schedule = %self.schedule_name, backup = %backup.name_any(), error = %e, "Failed to delete expired backup");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::schedule(format!(
                "failed to delete {} of {} expired backups",
                failed,
                expired.len()
            )));
        }
        Ok(deleted)
    }
}

#[async_trait]
impl<B: StoredObject> Job for RetentionTask<B> {
    async fn run(&self) {
        if let Err(e) = self.execute(Utc::now()).await {
            error!(schedule = %self.schedule_name, namespace = %self.namespace, error = %e, "Retention pass failed");
            metrics::record_task_failure(&self.schedule_name, &self.namespace, self.controller, "retention");
        }
    }
}
