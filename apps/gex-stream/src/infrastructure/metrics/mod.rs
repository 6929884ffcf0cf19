//! Prometheus Metrics Module
//!
//! Exposes stream and exposure metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Events**: feed events received by type, option updates applied
//! - **Connection**: lifecycle state, reconnects and errors
//! - **Exposure**: net gamma exposure, spot price, tracked options
//!
//! The application layer keeps its own atomic counters; the host copies
//! them here on every snapshot tick with [`publish_stats`].
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::services::SupervisorStats;
use crate::domain::exposure::SummaryMetrics;
use crate::domain::feed::{ConnectionState, EventKind};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once and return its handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
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
    describe_counter!(
        "gex_stream_events_received_total",
        "Feed events received by event type"
    );
    describe_counter!(
        "gex_stream_exposure_updates_total",
        "Option updates applied to the exposure aggregator"
    );
    describe_counter!(
        "gex_stream_reconnects_total",
        "Reconnect attempts scheduled"
    );
    describe_counter!(
        "gex_stream_errors_total",
        "Session failures and server-reported errors"
    );

    describe_gauge!(
        "gex_stream_connection_state",
        "Connection lifecycle state (0 disconnected .. 4 streaming, 5 closing)"
    );
    describe_gauge!(
        "gex_stream_tracked_options",
        "Option contracts with known gamma and open interest"
    );
    describe_gauge!(
        "gex_stream_net_gex_dollars",
        "Net dealer gamma exposure across all strikes"
    );
    describe_gauge!("gex_stream_spot_price", "Current underlying spot price");
    describe_gauge!(
        "gex_stream_zero_gamma_level",
        "Interpolated price where net exposure changes sign"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Copy the supervisor's cumulative counters into the recorder.
pub fn publish_stats(stats: &SupervisorStats) {
    for kind in EventKind::OPTION_KINDS {
        counter!(
            "gex_stream_events_received_total",
            "event_type" => kind.as_str()
        )
        .absolute(stats.events(kind));
    }
    counter!("gex_stream_exposure_updates_total").absolute(stats.exposure_updates());
    counter!("gex_stream_reconnects_total").absolute(stats.reconnects());
    counter!("gex_stream_errors_total").absolute(stats.errors());
}

/// Publish the exposure summary and spot price.
#[allow(clippy::cast_precision_loss)]
pub fn publish_summary(summary: &SummaryMetrics, spot_price: f64) {
    gauge!("gex_stream_net_gex_dollars").set(summary.net_gex);
    gauge!("gex_stream_tracked_options").set(summary.tracked_option_count as f64);
    gauge!("gex_stream_spot_price").set(spot_price);
    if let Some(level) = summary.zero_gamma_level {
        gauge!("gex_stream_zero_gamma_level").set(level);
    }
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("gex_stream_connection_state").set(f64::from(state.code()));
}

// =============================================================================
// Tests
// =============================================================================
