//! ClickHouseBackup controller
//!
//! Watches ClickHouseBackup resources and triggers reconciliation.

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

use crate::adapters::{HttpClickHouseApi, SystemResolver};
use crate::controllers::{requeue_after, Context};
use crate::crd::ClickHouseBackup;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::clickhouse_backup::{ClickHouseBackupReconciler, CONTROLLER};
use crate::reconcilers::finalizer;
use crate::store::KubeStore;

struct State {
    reconciler: ClickHouseBackupReconciler,
    shutdown: CancellationToken,
}

/// Run the ClickHouseBackup controller
pub async fn run(context: Arc<Context>) {
    let api: Api<ClickHouseBackup> = Api::all(context.client.clone());

    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("ClickHouseBackup CRD not installed: {}", e);
        return;
    }

    let http = match HttpClickHouseApi::new(context.config.http_timeout) {
        Ok(http) => http,
        Err(e) => {
            error!(error = %e, "Failed to build clickhouse-backup client");
            return;
        }
    };

    let state = Arc::new(State {
        reconciler: ClickHouseBackupReconciler::new(
            Arc::new(KubeStore::new(context.client.clone())),
            Arc::new(http),
            Arc::new(SystemResolver),
        ),
        shutdown: context.shutdown.clone(),
    });

    info!("Starting ClickHouseBackup controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled ClickHouseBackup"
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
async fn reconcile(obj: Arc<ClickHouseBackup>, state: Arc<State>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[CONTROLLER])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[CONTROLLER]).inc();

    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if obj.meta().deletion_timestamp.is_some() {
        if finalizer::has_finalizer(obj.as_ref()) {
            info!("Cleaning up ClickHouseBackup");
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

fn error_policy(obj: Arc<ClickHouseBackup>, error: &Error, _state: Arc<State>) -> Action {
    error!(
        name = %obj.name_any(),
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after(error))
}
