use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub(crate) const METRIC_STATE_TRANSITIONS: &str = "lifecycle_state_transitions_total";
pub(crate) const METRIC_REGISTRATION: &str = "lifecycle_registration_total";
pub(crate) const METRIC_DEREGISTRATION: &str = "lifecycle_deregistration_total";
pub(crate) const METRIC_SHUTDOWN_DURATION: &str = "lifecycle_shutdown_duration_seconds";
pub(crate) const METRIC_HTTP_REQUESTS: &str = "http_requests_total";
pub(crate) const METRIC_HTTP_REQUEST_DURATION: &str = "http_requests_duration_seconds";

/// Install the global Prometheus recorder. Call at most once per process.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Middleware recording request counts and latencies per matched route.
/// Someday tower-http might provide a metrics middleware: https://github.com/tower-rs/tower-http/issues/57
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    // Route template, not the raw URI; unmatched paths share one label.
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_owned();
    let method = req.method().to_string();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];

    metrics::counter!(METRIC_HTTP_REQUESTS, &labels).increment(1);
    metrics::histogram!(METRIC_HTTP_REQUEST_DURATION, &labels)
        .record(start.elapsed().as_secs_f64());

    response
}

pub(crate) fn emit_state_transition(state: &'static str) {
    metrics::counter!(METRIC_STATE_TRANSITIONS, "state" => state).increment(1);
}

pub(crate) fn emit_registration_result(result: &'static str) {
    metrics::counter!(METRIC_REGISTRATION, "result" => result).increment(1);
}

pub(crate) fn emit_deregistration_result(result: &'static str) {
    metrics::counter!(METRIC_DEREGISTRATION, "result" => result).increment(1);
}

pub(crate) fn emit_shutdown_duration(duration_secs: f64, clean: bool) {
    metrics::histogram!(
        METRIC_SHUTDOWN_DURATION,
        "clean" => clean.to_string()
    )
    .record(duration_secs);
}
