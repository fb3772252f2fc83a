//! Prometheus metrics helpers for outbox discovery.
//!
//! # Usage
//!
//! ```rust,ignore
//! use outbox_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("discovery_sessions_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: Component name (e.g., `relay_`, `discovery_`, `playback_`)
//! - Suffix: Unit or type (e.g., `_total`, `_seconds`)
//! - Labels: Use sparingly to avoid cardinality explosion (never a relay URL)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `/metrics` on the given port, then serves it from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded across the workspace.
fn register_common_metrics() {
    // =========================================================================
    // Endpoint Status Metrics
    // =========================================================================

    describe_counter!(
        "relay_status_transitions_total",
        "Endpoint status transitions (label: to)"
    );
    describe_counter!(
        "relay_transitions_rejected_total",
        "Status events rejected as invalid for the endpoint's current state"
    );
    describe_gauge!(
        "relay_connected",
        "Endpoints whose transport is up (Connected or Subscribed)"
    );
    describe_gauge!("relay_subscribed", "Endpoints with an accepted subscription");
    describe_gauge!("relay_tracked", "Endpoints tracked by the orchestrator");
    describe_counter!(
        "relay_connect_failures_total",
        "Connection attempts that ended in ConnectFailed (label: reason)"
    );
    describe_counter!("relay_disconnects_total", "Explicit disconnect-all requests");
    describe_histogram!(
        "relay_info_fetch_duration_seconds",
        "Round-trip time of NIP-11 relay information requests"
    );

    // =========================================================================
    // Discovery Metrics
    // =========================================================================

    describe_counter!("discovery_sessions_total", "Discovery sessions started");
    describe_counter!(
        "discovery_sessions_joined_total",
        "Start requests that joined an in-flight session"
    );
    describe_counter!(
        "discovery_attempts_total",
        "Per-endpoint query outcomes (label: outcome)"
    );
    describe_histogram!(
        "discovery_attempt_duration_seconds",
        "Time from dispatch to terminal outcome for one endpoint"
    );
    describe_histogram!(
        "discovery_session_duration_seconds",
        "Wall-clock time of a complete discovery session"
    );
    describe_gauge!("discovery_sessions_active", "Discovery sessions in flight");

    // =========================================================================
    // Republish Metrics
    // =========================================================================

    describe_counter!(
        "republish_attempts_total",
        "Republish attempts to stale endpoints (label: result)"
    );

    // =========================================================================
    // Playback Pool Metrics
    // =========================================================================

    describe_counter!("playback_pool_created_total", "Playback handles created");
    describe_counter!(
        "playback_pool_destroyed_total",
        "Playback handles destroyed (label: reason)"
    );
    describe_counter!(
        "playback_pool_evictions_total",
        "Unowned entries evicted to make room for a new key"
    );
    describe_counter!(
        "playback_pool_over_capacity_total",
        "Acquisitions that exceeded capacity because every entry was owned"
    );
    describe_gauge!("playback_pool_entries", "Live entries in the playback pool");
}
