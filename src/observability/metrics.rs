//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define shield metrics (requests, latency, violations, verdicts)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `shield_requests_total` (counter): requests by method, status
//! - `shield_request_duration_seconds` (histogram): latency distribution
//! - `shield_violations_total` (counter): violations by code
//! - `shield_rate_limited_total` (counter): refusals by limiter kind
//! - `shield_verdicts_total` (counter): verdicts by outcome
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library code
//!   and tests record unconditionally
//! - Labels stay low-cardinality: no paths, no client keys

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::security::types::Verdict;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "shield_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("shield_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_violation(code: &'static str) {
    counter!("shield_violations_total", "code" => code).increment(1);
}

pub fn record_rate_limited(kind: &'static str) {
    counter!("shield_rate_limited_total", "kind" => kind).increment(1);
}

pub fn record_verdict(verdict: &Verdict) {
    let outcome = if verdict.valid {
        "pass"
    } else if verdict.status.is_server_error() {
        "error"
    } else {
        "reject"
    };
    counter!("shield_verdicts_total", "outcome" => outcome).increment(1);
}
