//! ClickHouseBackup reconciler
//!
//! Drives a backup through clickhouse-backup's asynchronous API:
//! `Started -> Creating -> Created -> Uploading -> Completed`. Every phase is
//! persisted before the next step runs, so a reconcile can pick up from any
//! non-terminal phase after a restart or cancellation.

use std::sync::Arc;

use chrono::Utc;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{rows_for, ClickHouseApi, HostResolver};
use crate::crd::{BackoffSettings, ClickHouseApiEndpoint, ClickHouseBackup, Phase, PhaseEvent};
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::ObjectStore;

use super::endpoint;
use super::finalizer;
use super::poller::{PollFailure, Poller, ProbeError};

/// Controller label used in metrics
pub const CONTROLLER: &str = "clickhousebackup";

const STATUS_SUCCESS: &str = "success";
const STATUS_ERROR: &str = "error";

/// Which half of the workflow a poll is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Create,
    Upload,
}

impl Stage {
    fn succeeded(self) -> PhaseEvent {
        match self {
            Stage::Create => PhaseEvent::CreateSucceeded,
            Stage::Upload => PhaseEvent::UploadSucceeded,
        }
    }

    fn failed(self) -> PhaseEvent {
        match self {
            Stage::Create => PhaseEvent::CreateFailed,
            Stage::Upload => PhaseEvent::UploadFailed,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Stage::Create => "create",
            Stage::Upload => "upload",
        }
    }
}

/// State machine for ClickHouseBackup requests
pub struct ClickHouseBackupReconciler {
    store: Arc<dyn ObjectStore<ClickHouseBackup>>,
    api: Arc<dyn ClickHouseApi>,
    resolver: Arc<dyn HostResolver>,
}

impl ClickHouseBackupReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore<ClickHouseBackup>>,
        api: Arc<dyn ClickHouseApi>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            store,
            api,
            resolver,
        }
    }

    /// Run the workflow until a terminal phase is committed
    ///
    /// Setup failures (bad backoff settings, endpoint resolution, store
    /// conflicts) are returned without touching the phase so the caller can
    /// requeue. Cancellation leaves the last committed phase in place.
    #[instrument(skip(self, backup, cancel), fields(name = %backup.name_any(), namespace = backup.namespace()))]
    pub async fn apply(
        &self,
        mut backup: ClickHouseBackup,
        cancel: &CancellationToken,
    ) -> Result<ClickHouseBackup> {
        let settings = BackoffSettings::from_spec(backup.spec.exponential_back_off.as_ref())?;
        let origin = backup
            .creation_timestamp()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        let poller = Poller::new(settings).since(origin);

        loop {
            let phase = backup.phase();
            debug!(phase = %phase, "Handling phase");

            match phase {
                Phase::Unstarted => {
                    finalizer::add(self.store.as_ref(), &mut backup).await?;
                    self.commit(&mut backup, PhaseEvent::Start, None).await?;
                }
                Phase::Started => {
                    if !backup.status.as_ref().is_some_and(|s| s.api.is_resolved()) {
                        let api = self.resolve(&backup).await?;
                        backup.status_mut().api = api;
                    }

                    self.commit(&mut backup, PhaseEvent::CreateRequested, None)
                        .await?;
                    if let Err(e) = self.api.create(&backup).await {
                        warn!(error = %e, "Backup create request failed");
                        self.commit(&mut backup, PhaseEvent::CreateFailed, Some(e.to_string()))
                            .await?;
                    }
                }
                Phase::Creating => self.wait(&mut backup, &poller, Stage::Create, cancel).await?,
                Phase::Created => {
                    self.commit(&mut backup, PhaseEvent::UploadRequested, None)
                        .await?;
                    if let Err(e) = self.api.upload(&backup).await {
                        warn!(error = %e, "Backup upload request failed");
                        self.commit(&mut backup, PhaseEvent::UploadFailed, Some(e.to_string()))
                            .await?;
                    }
                }
                Phase::Uploading => self.wait(&mut backup, &poller, Stage::Upload, cancel).await?,
                Phase::CreateFailed | Phase::UploadFailed | Phase::Completed => {
                    info!(phase = %phase, "Backup finished");
                    return Ok(backup);
                }
                Phase::Failed => return Ok(backup),
            }
        }
    }

    /// Remove the remote backup best-effort, then release the finalizer
    #[instrument(skip(self, backup), fields(name = %backup.name_any(), namespace = backup.namespace()))]
    pub async fn cleanup(&self, backup: &ClickHouseBackup) -> Result<()> {
        let name = backup.name_any();
        let namespace = backup.namespace().unwrap_or_else(|| "default".to_string());

        let mut target = backup.clone();
        if !target.status.as_ref().is_some_and(|s| s.api.is_resolved()) {
            match self.resolve(&target).await {
                Ok(api) => target.status_mut().api = api,
                Err(e) => debug!(error = %e, "Endpoint unresolved, deleting via spec address"),
            }
        }

        if let Err(e) = self.api.delete(&target).await {
            warn!(error = %e, "Remote backup cleanup failed, releasing finalizer anyway");
            metrics::CLEANUP_FAILURES.with_label_values(&[CONTROLLER]).inc();
        }

        finalizer::remove_by_name(self.store.as_ref(), &name, &namespace).await
    }

    async fn resolve(&self, backup: &ClickHouseBackup) -> Result<ClickHouseApiEndpoint> {
        let namespace = backup.namespace().unwrap_or_else(|| "default".to_string());
        let resolved =
            endpoint::resolve(&backup.spec.api_address, &namespace, self.resolver.as_ref()).await?;

        debug!(address = %resolved.ip_url, hostname = %resolved.hostname, "Resolved backup API");
        Ok(ClickHouseApiEndpoint {
            address: resolved.ip_url,
            hostname: resolved.hostname,
        })
    }

    /// Apply `event`, record `error`, and persist the status
    async fn commit(
        &self,
        backup: &mut ClickHouseBackup,
        event: PhaseEvent,
        error: Option<String>,
    ) -> Result<()> {
        let status = backup.status_mut();
        super::advance(&mut status.phase, event)?;
        if let Some(error) = error {
            status.error = error;
        }

        *backup = self.store.update_status(backup).await?;
        debug!(phase = %backup.phase(), "Committed phase");
        Ok(())
    }

    /// Poll the service until `stage` settles, then commit the outcome
    async fn wait(
        &self,
        backup: &mut ClickHouseBackup,
        poller: &Poller,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if poller.is_expired() {
            let message = format!(
                "{} timed out after {}s since creation",
                stage.as_str(),
                poller.elapsed().as_secs()
            );
            warn!(stage = stage.as_str(), "Backup exceeded max elapsed time");
            return self.commit(backup, stage.failed(), Some(message)).await;
        }

        let name = backup.name_any();
        let snapshot = backup.clone();
        let outcome = poller
            .retry(cancel, || self.probe(&snapshot, &name))
            .await;

        match outcome {
            Ok(()) => self.commit(backup, stage.succeeded(), None).await,
            Err(PollFailure::Permanent(message)) => {
                warn!(stage = stage.as_str(), error = %message, "Backup stage failed");
                self.commit(backup, stage.failed(), Some(message)).await
            }
            Err(PollFailure::TimedOut(last)) => {
                let message = format!("{} timed out: {}", stage.as_str(), last);
                warn!(stage = stage.as_str(), error = %message, "Backup stage timed out");
                self.commit(backup, stage.failed(), Some(message)).await
            }
            Err(PollFailure::Cancelled) => Err(Error::Cancelled),
        }
    }

    /// One status check; the latest row mentioning the backup decides
    async fn probe(
        &self,
        backup: &ClickHouseBackup,
        name: &str,
    ) -> std::result::Result<(), ProbeError> {
        let rows = self
            .api
            .status(backup)
            .await
            .map_err(|e| ProbeError::Transient(e.to_string()))?;

        match rows_for(name, &rows).last() {
            Some(row) if row.status == STATUS_ERROR => Err(ProbeError::Permanent(row.error.clone())),
            Some(row) if row.status == STATUS_SUCCESS => Ok(()),
            Some(row) => Err(ProbeError::Transient(format!(
                "{:?} is {}",
                row.command, row.status
            ))),
            None => Err(ProbeError::Transient(format!("no status rows for {}", name))),
        }
    }
}
