//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "backups_operator_reconciliations_total",
        "Total number of reconciliations",
        &["controller"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "backups_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["controller"]
    ).unwrap();

    /// Reconciliation duration histogram; polling reconciles run for minutes
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "backups_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["controller"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
    ).unwrap();

    /// Finished backup requests (1 for the current outcome)
    pub static ref BACKUPS: GaugeVec = register_gauge_vec!(
        "backups_operator_backups",
        "Finished backup requests by outcome",
        &["name", "namespace", "controller", "status"]
    ).unwrap();

    /// Failed runs of scheduled jobs
    pub static ref SCHEDULED_TASK_FAILURES: CounterVec = register_counter_vec!(
        "backups_operator_scheduled_task_failures_total",
        "Total number of failed scheduled task runs",
        &["name", "namespace", "controller", "type"]
    ).unwrap();

    /// Registered scheduler jobs
    pub static ref SCHEDULED_JOBS: Gauge = register_gauge!(
        "backups_operator_scheduled_jobs",
        "Number of jobs registered in the scheduler"
    ).unwrap();

    /// Total number of cleanup operations
    pub static ref CLEANUPS: CounterVec = register_counter_vec!(
        "backups_operator_cleanups_total",
        "Total number of cleanup operations",
        &["controller"]
    ).unwrap();

    /// Remote cleanups that failed and were skipped
    pub static ref CLEANUP_FAILURES: CounterVec = register_counter_vec!(
        "backups_operator_cleanup_failures_total",
        "Total number of failed remote cleanups",
        &["controller"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "backups_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

const STATUS_SUCCESS: &str = "success";
const STATUS_FAILED: &str = "failed";

/// Record the outcome of a finished backup request
pub fn record_backup(name: &str, namespace: &str, controller: &str, failed: bool) {
    let (current, other) = if failed {
        (STATUS_FAILED, STATUS_SUCCESS)
    } else {
        (STATUS_SUCCESS, STATUS_FAILED)
    };

    BACKUPS
        .with_label_values(&[name, namespace, controller, current])
        .set(1.0);
    let _ = BACKUPS.remove_label_values(&[name, namespace, controller, other]);
}

/// Drop the series of a deleted backup request
pub fn forget_backup(name: &str, namespace: &str, controller: &str) {
    for status in [STATUS_SUCCESS, STATUS_FAILED] {
        if BACKUPS
            .remove_label_values(&[name, namespace, controller, status])
            .is_ok()
        {
            debug!(name, namespace, controller, status, "Removed backup series");
        }
    }
}

/// Count a failed scheduled job run; `task` is "create" or "retention"
pub fn record_task_failure(name: &str, namespace: &str, controller: &str, task: &str) {
    SCHEDULED_TASK_FAILURES
        .with_label_values(&[name, namespace, controller, task])
        .inc();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" | "/readyz" | "/ready" => {
            text_response(StatusCode::OK, "ok")
        }
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
