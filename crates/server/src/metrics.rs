//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the mp3disc server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Coordinator pool status (collected dynamically)
//! - Core transcode and run counters (registered from `mp3disc_core::metrics`)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mp3disc_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mp3disc_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mp3disc_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mp3disc_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mp3disc_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mp3disc_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when a client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mp3disc_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Coordinator Metrics (collected dynamically)
// =============================================================================

/// Runs with unfinished tracks.
pub static RUNS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mp3disc_runs_active", "Runs with tracks not yet terminal").unwrap()
});

/// Runs held in the registry.
pub static RUNS_REGISTERED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mp3disc_runs_registered", "Runs held in the registry").unwrap()
});

/// Transcodes in progress.
pub static TRANSCODE_POOL_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mp3disc_transcode_pool_active",
        "Tracks currently being transcoded",
    )
    .unwrap()
});

/// Tracks waiting for a worker.
pub static TRANSCODE_POOL_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mp3disc_transcode_pool_queued",
        "Tracks waiting for a transcode worker",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Coordinator
    registry.register(Box::new(RUNS_ACTIVE.clone())).unwrap();
    registry.register(Box::new(RUNS_REGISTERED.clone())).unwrap();
    registry
        .register(Box::new(TRANSCODE_POOL_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(TRANSCODE_POOL_QUEUED.clone()))
        .unwrap();

    // Core metrics
    for metric in mp3disc_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so pool gauges reflect the coordinator right now.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.coordinator().status().await;
    RUNS_ACTIVE.set(status.active_runs as i64);
    RUNS_REGISTERED.set(status.registered_runs as i64);
    TRANSCODE_POOL_ACTIVE.set(status.active_transcodes as i64);
    TRANSCODE_POOL_QUEUED.set(status.queued_tracks as i64);
}

/// Normalize a path for metrics labels so run ids don't explode cardinality.
pub fn normalize_path(path: &str) -> String {
    static UUID_REGEX: Lazy<Option<regex_lite::Regex>> = Lazy::new(|| {
        regex_lite::Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .ok()
    });
    static NUMERIC_REGEX: Lazy<Option<regex_lite::Regex>> =
        Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").ok());

    let mut result = path.to_string();
    if let Some(re) = UUID_REGEX.as_ref() {
        result = re.replace_all(&result, "{id}").into_owned();
    }
    if let Some(re) = NUMERIC_REGEX.as_ref() {
        result = re.replace_all(&result, "/{id}$1").into_owned();
    }
    result
}
