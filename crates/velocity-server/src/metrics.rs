//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter, labels: role).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: role).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Frames enqueued to subscribers by fanout (counter).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Frames dropped on a full or closed outbound queue (counter).
pub const RELAY_DROPS_TOTAL: &str = "relay_drops_total";
/// Sessions currently held by the registry (gauge).
pub const RELAY_SESSIONS_ACTIVE: &str = "relay_sessions_active";
/// Sessions evicted by the inactivity sweep (counter).
pub const SWEEP_EVICTIONS_TOTAL: &str = "sweep_evictions_total";
/// Stale timestamps refreshed by the sweep (counter).
pub const SWEEP_REFRESHES_TOTAL: &str = "sweep_refreshes_total";
/// Per-candidate sweep failures (counter).
pub const SWEEP_FAILURES_TOTAL: &str = "sweep_failures_total";
