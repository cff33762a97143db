//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, denials, delays, upstream relay)
//! - Expose a Prometheus-compatible endpoint on its own listener
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method and status
//! - `proxy_admission_denied_total` (counter): denials by reason class
//! - `proxy_admission_delay_ms` (histogram): pacing delays applied
//! - `proxy_paced_clients` (gauge): clients currently holding a pacing slot
//! - `proxy_upstream_response_bytes` (histogram): relayed response sizes
//! - `proxy_upstream_duration_seconds` (histogram): upstream latency
//!
//! # Design Decisions
//! - Low-overhead updates (atomic operations behind the metrics facade)
//! - Denial reasons are collapsed to a bounded label set; the full
//!   human-readable reason lives in the logs, not in label cardinality

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed client exchange.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}

/// Record an admission denial by reason class.
pub fn record_denial(reason: &'static str) {
    metrics::counter!("proxy_admission_denied_total", "reason" => reason).increment(1);
}

/// Record a pacing delay applied to a granted request.
pub fn record_delay(delay_ms: u64) {
    metrics::histogram!("proxy_admission_delay_ms").record(delay_ms as f64);
}

/// Record the current number of clients with a pacing slot.
pub fn record_tracked_clients(count: usize) {
    metrics::gauge!("proxy_paced_clients").set(count as f64);
}

/// Record a fully relayed upstream response.
pub fn record_upstream_response(bytes: u64, elapsed: Duration) {
    metrics::histogram!("proxy_upstream_response_bytes").record(bytes as f64);
    metrics::histogram!("proxy_upstream_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record an upstream transport failure.
pub fn record_upstream_error() {
    metrics::counter!("proxy_upstream_errors_total").increment(1);
}
