//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_sessions_total` (counter): sessions accepted
//! - `proxy_active_sessions` (gauge): sessions currently open
//! - `proxy_sessions_closed_total` (counter): closed sessions by `reason`
//! - `proxy_session_duration_seconds` (histogram): accept-to-close time
//! - `proxy_relayed_bytes_total` (counter): bytes by `direction`
//!
//! Without an installed recorder every update is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::proxy::SessionReport;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn session_opened() {
    counter!("proxy_sessions_total").increment(1);
    gauge!("proxy_active_sessions").increment(1.0);
}

pub fn session_closed(report: &SessionReport, elapsed: Duration) {
    gauge!("proxy_active_sessions").decrement(1.0);
    counter!("proxy_sessions_closed_total", "reason" => report.reason.as_str()).increment(1);
    histogram!("proxy_session_duration_seconds").record(elapsed.as_secs_f64());
    counter!("proxy_relayed_bytes_total", "direction" => "upstream").increment(report.bytes_to_upstream);
    counter!("proxy_relayed_bytes_total", "direction" => "client").increment(report.bytes_to_client);
}
