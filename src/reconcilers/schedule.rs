//! Backup schedule reconciler
//!
//! Maps a schedule object onto jobs in the process-local [`CronScheduler`].
//! Job ids are persisted in the schedule's status but only mean something to
//! the process that registered them, so every schedule is registered again
//! after a restart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::crd::{parse_duration, BackupScheduleResource, BackupScheduleStatus};
use crate::error::Result;
use crate::metrics;
use crate::scheduler::{CronScheduler, JobId};
use crate::store::ObjectStore;

use super::finalizer;
use super::schedule_tasks::{CreateBackupTask, RetentionTask};

/// Cron expression of retention passes
pub const RETENTION_SCHEDULE: &str = "@hourly";

/// True when the schedule's jobs must be (re)registered
///
/// Either the spec changed since the last registration, or the registration
/// happened before this process started and its jobs are gone.
pub fn needs_update(
    generation: Option<i64>,
    status: Option<&BackupScheduleStatus>,
    started_at: DateTime<Utc>,
) -> bool {
    let Some(status) = status else {
        return true;
    };

    generation.unwrap_or_default() != status.active_generation
        || status.updated_at.map_or(true, |t| t < started_at)
}

/// Owner of the scheduler shared by all schedule kinds
pub struct ScheduleManager {
    scheduler: CronScheduler,
    started_at: DateTime<Utc>,
}

impl ScheduleManager {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            scheduler: CronScheduler::new(),
            started_at,
        }
    }

    /// Start time of this process
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    /// Remove a recorded job; zero means none was recorded
    fn unregister(&self, id: JobId) {
        if id != 0 && !self.scheduler.remove(id) {
            debug!(job_id = id, "Recorded job not present in this process");
        }
    }

    fn update_gauge(&self) {
        metrics::SCHEDULED_JOBS.set(self.scheduler.len() as f64);
    }

    /// Abort all jobs on shutdown
    pub fn stop(&self) {
        self.scheduler.stop();
        self.update_gauge();
    }
}

/// Reconciler for one schedule kind
pub struct ScheduleReconciler<S: BackupScheduleResource> {
    schedules: Arc<dyn ObjectStore<S>>,
    backups: Arc<dyn ObjectStore<S::Backup>>,
    manager: Arc<ScheduleManager>,
}

impl<S: BackupScheduleResource> ScheduleReconciler<S> {
    pub fn new(
        schedules: Arc<dyn ObjectStore<S>>,
        backups: Arc<dyn ObjectStore<S::Backup>>,
        manager: Arc<ScheduleManager>,
    ) -> Self {
        Self {
            schedules,
            backups,
            manager,
        }
    }

    /// Register the schedule's jobs if its spec or the process changed
    #[instrument(skip(self, schedule), fields(name = %schedule.name_any(), namespace = schedule.namespace()))]
    pub async fn apply(&self, mut schedule: S) -> Result<S> {
        if !needs_update(
            schedule.meta().generation,
            schedule.schedule_status(),
            self.manager.started_at,
        ) {
            debug!("Schedule jobs are current");
            return Ok(schedule);
        }

        // Validate before touching registered jobs
        let retention = schedule.retention().map(parse_duration).transpose()?;

        finalizer::add(self.schedules.as_ref(), &mut schedule).await?;

        let previous = schedule.schedule_status().cloned().unwrap_or_default();
        self.manager.unregister(previous.schedule_task_id);
        self.manager.unregister(previous.retention_task_id);

        let scheduler = &self.manager.scheduler;
        let create = CreateBackupTask::new(schedule.clone(), self.backups.clone());
        let schedule_task_id = scheduler.add(schedule.cron(), Arc::new(create))?;

        let retention_task_id = match retention {
            Some(retention) => {
                let task = RetentionTask::new(&schedule, retention, self.backups.clone());
                match scheduler.add(RETENTION_SCHEDULE, Arc::new(task)) {
                    Ok(id) => id,
                    Err(e) => {
                        scheduler.remove(schedule_task_id);
                        return Err(e);
                    }
                }
            }
            None => 0,
        };

        let generation = schedule.meta().generation.unwrap_or_default();
        let status = schedule.schedule_status_mut();
        status.schedule_task_id = schedule_task_id;
        status.retention_task_id = retention_task_id;
        status.active_generation = generation;
        status.updated_at = Some(Utc::now());

        match self.schedules.update_status(&schedule).await {
            Ok(updated) => {
                info!(
                    schedule_task_id,
                    retention_task_id,
                    generation,
                    cron = %schedule.cron(),
                    "Registered schedule jobs"
                );
                self.manager.update_gauge();
                Ok(updated)
            }
            Err(e) => {
                // Unrecorded ids could never be removed again
                self.manager.unregister(schedule_task_id);
                self.manager.unregister(retention_task_id);
                self.manager.update_gauge();
                Err(e)
            }
        }
    }

    /// Remove the schedule's jobs and release the finalizer
    ///
    /// Spawned backups are left alone; they have their own lifecycle.
    #[instrument(skip(self, schedule), fields(name = %schedule.name_any(), namespace = schedule.namespace()))]
    pub async fn cleanup(&self, schedule: &S) -> Result<()> {
        if let Some(status) = schedule.schedule_status() {
            self.manager.unregister(status.schedule_task_id);
            self.manager.unregister(status.retention_task_id);
            self.manager.update_gauge();
        } else {
            warn!("Schedule has no recorded jobs");
        }

        let namespace = schedule.namespace().unwrap_or_else(|| "default".to_string());
        finalizer::remove_by_name(self.schedules.as_ref(), &schedule.name_any(), &namespace).await
    }
}
