//! Process-local cron scheduler
//!
//! Jobs live only as long as the process. Every registered entry runs a tokio
//! task that sleeps until the next fire time and spawns the job's `run`.
//! Ids are handed out from 1 upwards and are never reused within a process.

mod expression;

pub use expression::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Handle of a registered job, meaningful only within one process lifetime
pub type JobId = u64;

/// Work executed on every tick of a cron entry
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self);
}

struct Entry {
    expression: String,
    handle: JoinHandle<()>,
}

/// Registry of periodic jobs
pub struct CronScheduler {
    next_id: AtomicU64,
    entries: Mutex<HashMap<JobId, Entry>>,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `job` to run on `expression`; must be called inside a tokio runtime
    pub fn add(&self, expression: &str, job: Arc<dyn Job>) -> Result<JobId> {
        let schedule = parse_schedule(expression)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let handle = tokio::spawn(tick(id, schedule, job));
        self.entries().insert(
            id,
            Entry {
                expression: expression.to_string(),
                handle,
            },
        );

        info!(job_id = id, expression, "Registered scheduled job");
        Ok(id)
    }

    /// Unregister a job; false when the id is unknown
    pub fn remove(&self, id: JobId) -> bool {
        match self.entries().remove(&id) {
            Some(entry) => {
                entry.handle.abort();
                info!(job_id = id, expression = %entry.expression, "Removed scheduled job");
                true
            }
            None => {
                debug!(job_id = id, "Scheduled job not registered");
                false
            }
        }
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every entry
    pub fn stop(&self) {
        let mut entries = self.entries();
        for (_, entry) in entries.drain() {
            entry.handle.abort();
        }
        info!("Scheduler stopped");
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        for (_, entry) in self.entries().drain() {
            entry.handle.abort();
        }
    }
}

/// First fire time after both the previous fire time and `now`
///
/// Fire times missed while the task was late are skipped instead of being
/// run back to back.
fn next_fire(
    schedule: &Schedule,
    cursor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule.after(&cursor.max(now)).next()
}

/// Fire loop of one entry
async fn tick(id: JobId, schedule: Schedule, job: Arc<dyn Job>) {
    let mut cursor = Utc::now();

    loop {
        // Advancing from the previous fire time keeps a tick from firing twice
        let Some(next) = next_fire(&schedule, cursor, Utc::now()) else {
            warn!(job_id = id, "Cron expression has no upcoming fire time");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        cursor = next;

        debug!(job_id = id, fire_time = %next, "Running scheduled job");
        let job = job.clone();
        tokio::spawn(async move { job.run().await });
    }
}
