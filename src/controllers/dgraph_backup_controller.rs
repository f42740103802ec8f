//! DgraphBackup controller
//!
//! Watches DgraphBackup resources and triggers reconciliation.

use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Resource, ResourceExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::adapters::{HttpDgraphApi, KubeCredentialStore, S3ExportStorage};
use crate::controllers::{requeue_after, Context};
use crate::crd::DgraphBackup;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::dgraph_backup::{DgraphBackupReconciler, CONTROLLER};
use crate::reconcilers::finalizer;
use crate::store::KubeStore;

struct State {
    reconciler: DgraphBackupReconciler,
    shutdown: CancellationToken,
}

/// Run the DgraphBackup controller
pub async fn run(context: Arc<Context>) {
    let api: Api<DgraphBackup> = Api::all(context.client.clone());

    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("DgraphBackup CRD not installed: {}", e);
        return;
    }

    let http = match HttpDgraphApi::new(context.config.http_timeout, context.config.export_timeout) {
        Ok(http) => http,
        Err(e) => {
            error!(error = %e, "Failed to build Dgraph admin client");
            return;
        }
    };

    let state = Arc::new(State {
        reconciler: DgraphBackupReconciler::new(
            Arc::new(KubeStore::new(context.client.clone())),
            Arc::new(http),
            Arc::new(S3ExportStorage),
            Arc::new(KubeCredentialStore::new(context.client.clone())),
        ),
        shutdown: context.shutdown.clone(),
    });

    info!("Starting DgraphBackup controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled DgraphBackup"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS.with_label_values(&[CONTROLLER]).inc();
                }
            }
        })
        .await;
}

#[instrument(skip(state), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<DgraphBackup>, state: Arc<State>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[CONTROLLER])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[CONTROLLER]).inc();

    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if obj.meta().deletion_timestamp.is_some() {
        if finalizer::has_finalizer(obj.as_ref()) {
            info!("Cleaning up DgraphBackup");
            state.reconciler.cleanup(&obj).await?;
            metrics::CLEANUPS.with_label_values(&[CONTROLLER]).inc();
        }
        metrics::forget_backup(&name, &namespace, CONTROLLER);
        return Ok(Action::await_change());
    }

    let backup = state
        .reconciler
        .apply(obj.as_ref().clone(), &state.shutdown)
        .await?;

    let phase = backup.phase();
    if phase.is_terminal() {
        metrics::record_backup(&name, &namespace, CONTROLLER, phase.is_failure());
    }

    Ok(Action::await_change())
}

fn error_policy(obj: Arc<DgraphBackup>, error: &Error, _state: Arc<State>) -> Action {
    error!(
        name = %obj.name_any(),
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after(error))
}
