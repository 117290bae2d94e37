//! Prometheus metrics for the rate limiter.
//!
//! Exposed on a dedicated listener when `METRICS_PORT` is non-zero.
//!
//! # Available Metrics
//!
//! - `api_rate_limit_decisions_total` (counter, label `decision` = `admit` | `reject`)
//! - `api_rate_limit_swept_clients_total` (counter)
//! - `api_rate_limit_tracked_clients` (gauge)
//!
//! Recording functions are safe to call before (or without) `init_metrics`;
//! the `metrics` facade discards samples when no recorder is installed.

use std::net::SocketAddr;

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "api_rate_limit_decisions_total";
    pub const RATE_LIMIT_SWEPT_CLIENTS_TOTAL: &str = "api_rate_limit_swept_clients_total";
    pub const RATE_LIMIT_TRACKED_CLIENTS: &str = "api_rate_limit_tracked_clients";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Fails if the listener cannot be installed (e.g. a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limiter decisions by outcome"
    );
    describe_counter!(
        names::RATE_LIMIT_SWEPT_CLIENTS_TOTAL,
        "Idle clients dropped by the background sweep"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_CLIENTS,
        "Clients currently holding rate limiter state"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record one limiter decision.
pub fn record_decision(admitted: bool) {
    let decision = if admitted { "admit" } else { "reject" };
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "decision" => decision).increment(1);
}

/// Record clients removed by a sweep.
pub fn record_swept_clients(count: usize) {
    counter!(names::RATE_LIMIT_SWEPT_CLIENTS_TOTAL).increment(count as u64);
}

/// Update the tracked-clients gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_tracked_clients(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_CLIENTS).set(count as f64);
}
