//! Prometheus metrics for ShuffleStore.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.  The
//! engines report per-operation and per-record outcomes through the
//! helpers at the bottom; without an installed recorder those are no-ops.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "shufflestore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "shufflestore_http_request_duration_seconds";

/// Lifecycle operations (counter). Labels: operation, status.
pub const FILE_OPERATIONS_TOTAL: &str = "shufflestore_file_operations_total";

/// Records processed by batch runs (counter). Labels: batch, outcome.
pub const BATCH_RECORDS_TOTAL: &str = "shufflestore_batch_records_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
///
/// If some other recorder is already installed, the returned handle renders
/// an empty registry.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Prometheus recorder not installed: {e}");
            PrometheusBuilder::new().build_recorder().handle()
        }
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(FILE_OPERATIONS_TOTAL, "File lifecycle operations by outcome");
    describe_counter!(BATCH_RECORDS_TOTAL, "Records processed by cleanup and shuffle runs");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels,
/// so record ids do not become label values.
///
/// Examples:
/// - `/files/upload` -> `/files/upload`
/// - `/files/3f2c...` -> `/files/{id}`
/// - `/files/3f2c.../restore` -> `/files/{id}/restore`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" | "/files" | "/files/upload" | "/files/shuffle"
        | "/files/cleanup" => path.to_string(),
        _ => {
            let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
            match segments.as_slice() {
                ["files", _] => "/files/{id}".to_string(),
                ["files", _, "restore"] => "/files/{id}/restore".to_string(),
                _ => "/{other}".to_string(),
            }
        }
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics disabled").into_response(),
    }
}

// -- Engine helpers -----------------------------------------------------------

/// Count one lifecycle operation.
pub fn record_file_operation(operation: &'static str, success: bool) {
    let status = if success { "ok" } else { "error" };
    counter!(FILE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

/// Count one record handled by a batch run.
pub fn record_batch_outcome(batch: &'static str, outcome: &'static str) {
    counter!(BATCH_RECORDS_TOTAL, "batch" => batch, "outcome" => outcome).increment(1);
}

// -- Tests --------------------------------------------------------------------
