//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatch_requests_total` (counter): requests by method, route, status
//! - `dispatch_request_duration_seconds` (histogram): time to response head
//! - `dispatch_streams_total` (counter): streaming responses by outcome
//! - `dispatch_coalesced_calls_total` (counter): calls by limiter outcome
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Route labels use the registered pattern, never the raw path

use std::net::SocketAddr;
use std::time::Instant;

use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("route", route.to_string()),
        Label::new("status", status.to_string()),
    ];
    metrics::counter!("dispatch_requests_total", labels.clone()).increment(1);
    metrics::histogram!("dispatch_request_duration_seconds", labels).record(start.elapsed().as_secs_f64());
}

pub fn record_stream(outcome: &'static str) {
    metrics::counter!("dispatch_streams_total", "outcome" => outcome).increment(1);
}

pub fn record_coalesced(outcome: &'static str) {
    metrics::counter!("dispatch_coalesced_calls_total", "outcome" => outcome).increment(1);
}
