//! Kubernetes controllers for the backup CRDs
//!
//! Each controller watches one kind and hands changed objects to its
//! reconciler. Deletion is driven by the operator's own finalizer.

mod clickhouse_backup_controller;
mod dgraph_backup_controller;
mod schedule_controller;

pub use clickhouse_backup_controller::run as run_clickhouse_backup_controller;
pub use dgraph_backup_controller::run as run_dgraph_backup_controller;
pub use schedule_controller::run as run_schedule_controller;

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::error::Error;
use crate::reconcilers::schedule::ScheduleManager;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub config: OperatorConfig,
    /// Scheduler shared by all schedule kinds
    pub schedules: Arc<ScheduleManager>,
    /// Cancelled on shutdown; aborts in-flight polling
    pub shutdown: CancellationToken,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig, schedules: Arc<ScheduleManager>) -> Self {
        Self {
            client,
            config,
            schedules,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Requeue delay for a failed reconcile
pub(crate) fn requeue_after(error: &Error) -> Duration {
    match error {
        Error::Conflict(_) => Duration::from_secs(1),
        Error::Cancelled => Duration::from_secs(5),
        Error::Kube(_) | Error::Endpoint(_) | Error::SecretNotFound(_) => Duration::from_secs(30),
        Error::Config(_) | Error::Schedule(_) => Duration::from_secs(300),
        _ => Duration::from_secs(30),
    }
}
