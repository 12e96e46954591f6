//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Cycles**: Broadcast cycles completed and failed, cycle duration
//! - **Deliveries**: Tick frames queued and dropped
//! - **Connections**: Active stream connections
//! - **Requests**: Rejected control messages
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::services::CycleReport;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Cycle counters
    describe_counter!(
        "fx_stream_cycles_total",
        "Total broadcast cycles by outcome"
    );
    describe_histogram!(
        "fx_stream_cycle_duration_seconds",
        "Time to reprice and fan out every instrument"
    );

    // Delivery counters
    describe_counter!(
        "fx_stream_ticks_delivered_total",
        "Total tick frames queued to connections"
    );
    describe_counter!(
        "fx_stream_ticks_dropped_total",
        "Total tick frames dropped for closed or slow connections"
    );

    // Connection gauges
    describe_gauge!(
        "fx_stream_connections",
        "Number of active stream connections"
    );

    // Request counters
    describe_counter!(
        "fx_stream_rejected_requests_total",
        "Total control messages answered with an error"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed broadcast cycle.
pub fn record_cycle(report: &CycleReport) {
    counter!("fx_stream_cycles_total", "outcome" => "ok").increment(1);
    counter!("fx_stream_ticks_delivered_total").increment(report.deliveries as u64);
    counter!("fx_stream_ticks_dropped_total").increment(report.failures as u64);
}

/// Record an aborted broadcast cycle.
pub fn record_cycle_failure() {
    counter!("fx_stream_cycles_total", "outcome" => "failed").increment(1);
}

/// Record broadcast cycle duration.
pub fn record_cycle_duration(duration: Duration) {
    histogram!("fx_stream_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Update the active connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_connections(count: usize) {
    gauge!("fx_stream_connections").set(count as f64);
}

/// Record a control message answered with an error.
pub fn record_rejected_request() {
    counter!("fx_stream_rejected_requests_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
