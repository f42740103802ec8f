//! Backup schedule controller
//!
//! One generic controller serves every schedule kind; all of them share the
//! scheduler held by the [`Context`].

use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::controllers::{requeue_after, Context};
use crate::crd::BackupScheduleResource;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::finalizer;
use crate::reconcilers::schedule::ScheduleReconciler;
use crate::store::KubeStore;

/// Run the controller for schedule kind `S`
pub async fn run<S: BackupScheduleResource>(context: Arc<Context>) {
    let kind = S::kind(&()).to_string();
    let api: Api<S> = Api::all(context.client.clone());

    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("{} CRD not installed: {}", kind, e);
        return;
    }

    let reconciler = Arc::new(ScheduleReconciler::<S>::new(
        Arc::new(KubeStore::new(context.client.clone())),
        Arc::new(KubeStore::new(context.client.clone())),
        context.schedules.clone(),
    ));

    info!("Starting {} controller", kind);

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile::<S>, error_policy::<S>, reconciler)
        .for_each(|result| {
            let kind = kind.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        info!(
                            name = %obj.name,
                            namespace = obj.namespace.as_deref().unwrap_or("default"),
                            "Reconciled {}", kind
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Reconciliation error");
                        metrics::RECONCILIATION_ERRORS
                            .with_label_values(&[S::CONTROLLER])
                            .inc();
                    }
                }
            }
        })
        .await;
}

#[instrument(skip(reconciler), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile<S: BackupScheduleResource>(
    obj: Arc<S>,
    reconciler: Arc<ScheduleReconciler<S>>,
) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[S::CONTROLLER])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[S::CONTROLLER]).inc();

    if obj.meta().deletion_timestamp.is_some() {
        if finalizer::has_finalizer(obj.as_ref()) {
            info!("Removing schedule jobs");
            reconciler.cleanup(&obj).await?;
            metrics::CLEANUPS.with_label_values(&[S::CONTROLLER]).inc();
        }
        return Ok(Action::await_change());
    }

    reconciler.apply(obj.as_ref().clone()).await?;
    Ok(Action::await_change())
}

fn error_policy<S: BackupScheduleResource>(
    obj: Arc<S>,
    error: &Error,
    _reconciler: Arc<ScheduleReconciler<S>>,
) -> Action {
    error!(
        name = %obj.name_any(),
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after(error))
}
