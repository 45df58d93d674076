//! Metrics collection and exposition.
//!
//! # Metrics
//! - `host_sync_cycles_total` (counter): commit cycles run
//! - `host_sync_commits_total` (counter): per-key outcomes by `status`
//! - `host_sync_reloads_total` (counter): physical reloads by `result`
//! - `host_sync_cycle_duration_seconds` (histogram): cycle wall time
//! - `host_sync_active_hosts` (gauge): entries in the active tree
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so library users
//!   and tests pay nothing
//! - The Prometheus exporter serves its own listener

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cycle(duration: Duration) {
    counter!("host_sync_cycles_total").increment(1);
    histogram!("host_sync_cycle_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_commit(status: &'static str) {
    counter!("host_sync_commits_total", "status" => status).increment(1);
}

pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("host_sync_reloads_total", "result" => result).increment(1);
}

pub fn record_active_hosts(count: usize) {
    gauge!("host_sync_active_hosts").set(count as f64);
}
