//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, target
//! - `gateway_request_duration_seconds` (histogram): latency by method, target
//! - `gateway_upstream_errors_total` (counter): failed outbound calls
//! - `gateway_snapshot_writes_total` (counter): snapshot writes by outcome
//! - `gateway_cluster_events_total` (counter): received events by topic, outcome
//! - `gateway_port_forward_connections` (gauge): live tunnelled connections
//! - `gateway_port_forward_dial_errors_total` (counter): failed remote dials
//!
//! # Design Decisions
//! - `target` is one of `handler`, `rest`, `reverse_proxy`, `not_found`, never a raw path,
//!   so label cardinality stays bounded

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one served request.
pub fn record_request(method: &str, status: u16, target: &'static str, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "target" => target
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "target" => target
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(target: &'static str) {
    metrics::counter!("gateway_upstream_errors_total", "target" => target).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_noop() {
        record_request("GET", 200, "rest", Instant::now());
        record_upstream_error("reverse_proxy");
    }
}
