//! Prometheus metrics definitions and the metrics/probe HTTP server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Backups handed to the reconciler
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "volume_backup_operator_reconciliations_total",
        "Number of Backup reconciles run by the controller",
        &["kind"]
    ).unwrap();

    /// Reconciles that returned an error and went through the retry path
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "volume_backup_operator_reconciliation_errors_total",
        "Number of reconciles that returned an error",
        &["kind"]
    ).unwrap();

    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "volume_backup_operator_reconcile_duration_seconds",
        "Time spent reconciling one Backup, in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Backups given up on after exhausting their retries
    pub static ref DROPPED_KEYS: CounterVec = register_counter_vec!(
        "volume_backup_operator_dropped_keys_total",
        "Total number of Backups no longer retried after max retries",
        &["kind"]
    ).unwrap();

    /// Backup state transitions by target state
    pub static ref BACKUP_STATE_TRANSITIONS: CounterVec = register_counter_vec!(
        "volume_backup_operator_backup_state_transitions_total",
        "Total number of backup state transitions by new state",
        &["state"]
    ).unwrap();

    /// Finalizers released after remote cleanup
    pub static ref CLEANUPS: CounterVec = register_counter_vec!(
        "volume_backup_operator_cleanups_total",
        "Number of backups whose finalizer was released",
        &["kind"]
    ).unwrap();

    /// Transfers currently watched by a progress monitor
    pub static ref ACTIVE_TRANSFER_MONITORS: prometheus::Gauge = prometheus::register_gauge!(
        "volume_backup_operator_active_transfer_monitors",
        "Number of snapshot transfers currently being monitored"
    ).unwrap();

    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "volume_backup_operator_health",
        "1 while the metrics server is up"
    ).unwrap();
}

/// Flipped once the controller has started its workers
static READY: AtomicBool = AtomicBool::new(false);

/// Mark the operator ready (or not) for the readiness probe
pub fn set_ready(ready: bool) {
    READY.store(ready, Ordering::Relaxed);
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
    Ok(route(req.uri().path()))
}

/// Build the response for a request path
fn route(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => text_response(StatusCode::OK, "ok"),
        "/readyz" | "/ready" if READY.load(Ordering::Relaxed) => {
            text_response(StatusCode::OK, "ok")
        }
        "/readyz" | "/ready" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
