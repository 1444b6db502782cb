//! Prometheus exposition for the `metrics` facade.
//!
//! The broker, the dispatcher and the metrics aggregator record through the
//! facade; this module installs the recorder and renders `GET /metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Recorded by the broker and the dispatcher
    pub use wrench_core::events::{EVENTS_PUBLISHED_TOTAL, OBSERVER_FAILURES_TOTAL};
    pub use wrench_notifications::NOTIFICATIONS_TOTAL;

    // Work-order metrics
    pub const EVENTS_TOTAL: &str = "wrench_events_total";
    pub const OPEN_WORK_ORDERS: &str = "wrench_open_work_orders";
    pub const IN_PROGRESS_WORK_ORDERS: &str = "wrench_in_progress_work_orders";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics is served by our own router
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}
