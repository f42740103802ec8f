//! Backups Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! the shared scheduler, and runs the controllers of all backup kinds.

use std::sync::Arc;

use chrono::Utc;
use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use backups_operator::{
    config::OperatorConfig,
    controllers::{self, Context},
    crd::{ClickHouseBackupSchedule, DgraphBackupSchedule},
    metrics,
    reconcilers::schedule::ScheduleManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let started_at = Utc::now();
    let config = OperatorConfig::from_env()?;
    info!(?config, "Starting Backups Operator");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let schedules = Arc::new(ScheduleManager::new(started_at));
    let context = Arc::new(Context::new(client, config.clone(), schedules.clone()));

    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let clickhouse_backups = controllers::run_clickhouse_backup_controller(context.clone());
    let clickhouse_schedules =
        controllers::run_schedule_controller::<ClickHouseBackupSchedule>(context.clone());
    let dgraph_backups = controllers::run_dgraph_backup_controller(context.clone());
    let dgraph_schedules =
        controllers::run_schedule_controller::<DgraphBackupSchedule>(context.clone());

    tokio::select! {
        _ = clickhouse_backups => {
            error!("ClickHouseBackup controller exited unexpectedly");
        }
        _ = clickhouse_schedules => {
            error!("ClickHouseBackupSchedule controller exited unexpectedly");
        }
        _ = dgraph_backups => {
            error!("DgraphBackup controller exited unexpectedly");
        }
        _ = dgraph_schedules => {
            error!("DgraphBackupSchedule controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    context.shutdown.cancel();
    schedules.stop();

    info!("Backups Operator stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
