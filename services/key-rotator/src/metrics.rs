//! Prometheus metrics exposition
//!
//! - `proxy_requests_total` (counter): labels `status`, `method`
//! - `proxy_request_duration_seconds` (histogram): label `status`
//! - `rotator_upstream_attempts_total` (counter): label `outcome`
//! - `rotator_credentials_available` (gauge)
//!
//! Credentials are never used as label values.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Duration buckets from 5ms to 120s. Generation calls routinely run for
/// tens of seconds, so the upper buckets are wider than a typical API proxy.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("proxy_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder globally and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed inbound request.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("proxy_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record one upstream attempt by classification label.
pub fn record_attempt(outcome: &'static str) {
    metrics::counter!("rotator_upstream_attempts_total", "outcome" => outcome).increment(1);
}

pub fn set_credentials_available(available: usize) {
    metrics::gauge!("rotator_credentials_available").set(available as f64);
}
