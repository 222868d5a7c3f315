//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_forward_total` (counter): forwards by upstream, policy, status
//! - `edge_forward_duration_seconds` (histogram): forward latency
//! - `edge_retries_total` (counter): retry attempts by policy
//! - `edge_server_online` (gauge): 1=online, 0=offline, by upstream and server
//!
//! # Design Decisions
//! - Label values are owned so they outlive the request context
//! - Nothing is recorded until `init_metrics` installs the exporter

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    ::metrics::describe_counter!("edge_forward_total", "Forwarded requests by outcome");
    ::metrics::describe_histogram!(
        "edge_forward_duration_seconds",
        ::metrics::Unit::Seconds,
        "Time spent forwarding a request, retries included"
    );
    ::metrics::describe_counter!("edge_retries_total", "Retry attempts");
    ::metrics::describe_gauge!("edge_server_online", "1 if the server is online");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one forward through `upstream`.
pub fn record_forward(upstream: &str, policy: &str, status: u16, start: Instant) {
    ::metrics::counter!(
        "edge_forward_total",
        "upstream" => upstream.to_string(),
        "policy" => policy.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "edge_forward_duration_seconds",
        "upstream" => upstream.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(policy: &str) {
    ::metrics::counter!("edge_retries_total", "policy" => policy.to_string()).increment(1);
}

/// Export a server's health as seen by the checker of `upstream`.
pub fn record_server_health(upstream: &str, server: &str, online: bool) {
    ::metrics::gauge!(
        "edge_server_online",
        "upstream" => upstream.to_string(),
        "server" => server.to_string()
    )
    .set(if online { 1.0 } else { 0.0 });
}
