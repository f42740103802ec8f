//! DgraphBackup reconciler
//!
//! Exports run synchronously, so a request only ever goes
//! `Started -> Completed` or `Started -> Failed`.

use std::sync::Arc;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{
    CredentialStore, Credentials, DgraphApi, ExportLocation, ExportOutput, ExportStorage,
};
use crate::crd::{DgraphBackup, DgraphExportResponse, Phase, PhaseEvent};
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::ObjectStore;

use super::endpoint;
use super::finalizer;

/// Controller label used in metrics
pub const CONTROLLER: &str = "dgraphbackup";

/// State machine for DgraphBackup requests
pub struct DgraphBackupReconciler {
    store: Arc<dyn ObjectStore<DgraphBackup>>,
    api: Arc<dyn DgraphApi>,
    storage: Arc<dyn ExportStorage>,
    credentials: Arc<dyn CredentialStore>,
}

impl DgraphBackupReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore<DgraphBackup>>,
        api: Arc<dyn DgraphApi>,
        storage: Arc<dyn ExportStorage>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            store,
            api,
            storage,
            credentials,
        }
    }

    /// Run the export once and commit its outcome
    #[instrument(skip(self, backup, cancel), fields(name = %backup.name_any(), namespace = backup.namespace()))]
    pub async fn apply(
        &self,
        mut backup: DgraphBackup,
        cancel: &CancellationToken,
    ) -> Result<DgraphBackup> {
        loop {
            match backup.phase() {
                Phase::Unstarted => {
                    finalizer::add(self.store.as_ref(), &mut backup).await?;
                    self.commit(&mut backup, PhaseEvent::Start, None).await?;
                }
                Phase::Started => {
                    let namespace = backup.namespace().unwrap_or_else(|| "default".to_string());
                    let credentials = self
                        .credentials
                        .resolve(&backup.spec.secrets, &namespace)
                        .await?;
                    let admin_url = endpoint::fqdn(&backup.spec.admin_url, &namespace)?;

                    info!(admin_url = %admin_url, destination = %backup.spec.destination, "Starting export");
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        result = self.api.export(&admin_url, &backup.spec, &credentials) => result,
                    };

                    match result {
                        Ok(output) => {
                            backup.status_mut().export_response = export_response(output);
                            self.commit(&mut backup, PhaseEvent::ExportSucceeded, None)
                                .await?;
                        }
                        Err(e) => {
                            warn!(error = %e, "Export failed");
                            self.commit(&mut backup, PhaseEvent::ExportFailed, Some(e.to_string()))
                                .await?;
                        }
                    }
                }
                Phase::Completed | Phase::Failed => {
                    info!(phase = %backup.phase(), "Backup finished");
                    return Ok(backup);
                }
                phase => {
                    warn!(phase = %phase, "Phase is not used by exports, leaving as is");
                    return Ok(backup);
                }
            }
        }
    }

    /// Delete the exported files best-effort, then release the finalizer
    ///
    /// A failed credential lookup does not stop the deletion attempt; the
    /// storage client then falls back to its ambient credentials.
    #[instrument(skip(self, backup), fields(name = %backup.name_any(), namespace = backup.namespace()))]
    pub async fn cleanup(&self, backup: &DgraphBackup) -> Result<()> {
        let name = backup.name_any();
        let namespace = backup.namespace().unwrap_or_else(|| "default".to_string());

        if backup.exported_files().is_empty() {
            debug!("No exported files recorded, nothing to delete");
        } else if let Err(e) = self.delete_export(backup, &namespace).await {
            warn!(error = %e, "Export cleanup failed, releasing finalizer anyway");
            metrics::CLEANUP_FAILURES.with_label_values(&[CONTROLLER]).inc();
        }

        finalizer::remove_by_name(self.store.as_ref(), &name, &namespace).await
    }

    async fn delete_export(&self, backup: &DgraphBackup, namespace: &str) -> Result<()> {
        let credentials = match self
            .credentials
            .resolve(&backup.spec.secrets, namespace)
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Failed to resolve export credentials");
                Credentials::new()
            }
        };

        let location = ExportLocation::derive(&backup.spec.destination, backup.exported_files())?;
        let deleted = self
            .storage
            .delete_export(&location, &backup.spec.region, &credentials)
            .await?;

        info!(bucket = %location.bucket, prefix = %location.key_prefix(), deleted, "Deleted export");
        Ok(())
    }

    async fn commit(
        &self,
        backup: &mut DgraphBackup,
        event: PhaseEvent,
        error: Option<String>,
    ) -> Result<()> {
        let status = backup.status_mut();
        super::advance(&mut status.phase, event)?;
        if let Some(error) = error {
            status.error = error;
        }

        *backup = self.store.update_status(backup).await?;
        Ok(())
    }
}

fn export_response(output: ExportOutput) -> DgraphExportResponse {
    DgraphExportResponse {
        message: output.response.message,
        code: output.response.code,
        exported_files: output.exported_files,
    }
}
