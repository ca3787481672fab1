//! Prometheus metrics helpers for the delegation indexer.
//!
//! This module provides centralized metrics initialization and the metric
//! descriptions used by the ingestion engine and its source client.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tzdeleg_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     use metrics::{counter, gauge};
//!     counter!("poll_ticks_total").increment(1);
//!     gauge!("last_indexed_level").set(4_200_000.0);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`delegations_`, `poll_`, `backfill_`, `source_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only low-cardinality outcomes (`status`, `outcome`)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
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
/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `0.0.0.0:{port}` and serves `/metrics` from a background task.
/// Bind errors are returned to the caller.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<SocketAddr, std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(addr)
}

/// Register descriptions for every metric the indexer emits.
///
/// Called automatically by [`init_metrics`].
pub fn register_common_metrics() {
    // =========================================================================
    // Store
    // =========================================================================

    describe_counter!(
        "delegations_stored_total",
        "Delegations newly inserted into the store"
    );
    describe_counter!(
        "delegations_updated_total",
        "Delegations whose operation hash already existed and were refreshed"
    );
    describe_counter!(
        "delegations_processed_total",
        "Batches persisted, by outcome (label: status)"
    );
    describe_counter!(
        "delegations_discarded_total",
        "Source operations dropped at conversion because they were not applied"
    );

    // =========================================================================
    // Polling
    // =========================================================================

    describe_counter!("poll_ticks_total", "Poll ticks started");
    describe_counter!(
        "poll_errors_total",
        "Poll ticks aborted by a fetch or store failure"
    );
    describe_gauge!(
        "last_indexed_level",
        "Highest block level durably stored"
    );

    // =========================================================================
    // Backfill
    // =========================================================================

    describe_gauge!(
        "backfill_running",
        "Whether historical backfill is running (1=yes, 0=no)"
    );
    describe_gauge!(
        "backfill_progress",
        "Historical backfill progress (0-100)"
    );
    describe_counter!(
        "backfill_pages_total",
        "Pages received from the source during backfill"
    );
    describe_counter!(
        "backfill_failures_total",
        "Backfill runs that ended with an error"
    );
    describe_gauge!(
        "backfill_verification_missing",
        "Applied delegations reported by the source but missing from the store after backfill"
    );

    // =========================================================================
    // Source client
    // =========================================================================

    describe_histogram!(
        "source_request_duration_seconds",
        "Latency of individual source API attempts"
    );
    describe_counter!(
        "source_requests_total",
        "Source API attempts (label: outcome)"
    );
    describe_counter!(
        "source_retries_total",
        "Source API attempts retried after a transient failure"
    );

    // =========================================================================
    // Daemon
    // =========================================================================

    describe_gauge!(
        "ingestion_running",
        "Whether the ingestion daemon is running (1=yes, 0=no)"
    );
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Increment a counter.
///
/// Convenience wrapper around `metrics::counter!`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Increment a counter carrying a single label.
#[inline]
pub fn increment_labeled(name: &'static str, label: &'static str, value: &'static str) {
    metrics::counter!(name, label => value).increment(1);
}

/// Set a gauge value.
///
/// Convenience wrapper around `metrics::gauge!`.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

/// Record a histogram sample.
#[inline]
pub fn record_histogram(name: &'static str, value: f64) {
    metrics::histogram!(name).record(value);
}
