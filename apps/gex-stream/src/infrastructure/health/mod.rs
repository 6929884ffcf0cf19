//! Health Check, Metrics and Exposure Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, Prometheus
//! metrics and the live exposure view.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready only while streaming)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /exposure` - Summary, strike rows, history and strike activity
//! - `GET /history` - Timestamps of persisted merge-buffer entries
//! - `GET /history/{timestamp}` - Exposure rebuilt from one entry (RFC 3339)

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, http::StatusCode, routing::get};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::HistoryError;
use crate::application::services::{
    CenterPrice, HistoryRecorder, SharedPending, SupervisorEvent, SupervisorStats,
};
use crate::domain::exposure::{
    ExposureAggregator, ExposureConfig, ExposureView, PendingUpdates, StrikeActivity,
};
use crate::domain::feed::ConnectionState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Feed Status
// =============================================================================

/// Connection status recorded from supervisor events.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
    last_error: RwLock<Option<String>>,
    center: RwLock<Option<CenterPrice>>,
    subscribed_symbols: AtomicUsize,
    reconnect_attempt: AtomicU32,
}

impl FeedStatus {
    /// Create a status in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one supervisor event.
    pub fn apply(&self, event: &SupervisorEvent) {
        match event {
            SupervisorEvent::StateChanged(state) => {
                *self.state.write() = *state;
                if *state == ConnectionState::Streaming {
                    self.reconnect_attempt.store(0, Ordering::Relaxed);
                }
            }
            SupervisorEvent::Reconnecting { attempt, .. } => {
                self.reconnect_attempt.store(*attempt, Ordering::Relaxed);
            }
            SupervisorEvent::CenterResolved(center) => {
                *self.center.write() = Some(*center);
            }
            SupervisorEvent::Subscribed { symbols } => {
                self.subscribed_symbols.store(*symbols, Ordering::Relaxed);
            }
            SupervisorEvent::Error(message) => {
                *self.last_error.write() = Some(message.clone());
            }
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn info(&self, stats: &SupervisorStats) -> FeedInfo {
        let state = self.state();
        let center = *self.center.read();
        FeedInfo {
            state: state.as_str(),
            connected: state == ConnectionState::Streaming,
            center_price: center.map(|c| c.price.to_string()),
            center_from_quote: center.is_some_and(|c| !c.is_fallback()),
            subscribed_symbols: self.subscribed_symbols.load(Ordering::Relaxed),
            reconnect_attempt: self.reconnect_attempt.load(Ordering::Relaxed),
            events_received: stats.total_events(),
            exposure_updates: stats.exposure_updates(),
            reconnects: stats.reconnects(),
            errors: stats.errors(),
            last_error: self.last_error.read().clone(),
        }
    }
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub feed: FeedInfo,
    /// Option contracts contributing to exposure.
    pub tracked_options: usize,
    /// Spot price used for new computations.
    pub spot_price: f64,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming.
    Healthy,
    /// Connecting or handshaking.
    Degraded,
    /// Disconnected or shutting down.
    Unhealthy,
}

impl From<ConnectionState> for HealthStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Streaming => Self::Healthy,
            ConnectionState::Connecting
            | ConnectionState::AuthPending
            | ConnectionState::Subscribing => Self::Degraded,
            ConnectionState::Disconnected | ConnectionState::Closing => Self::Unhealthy,
        }
    }
}

/// Feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: &'static str,
    /// Whether the feed is streaming.
    pub connected: bool,
    /// Ladder center of the current session.
    pub center_price: Option<String>,
    /// Whether the center came from a live quote.
    pub center_from_quote: bool,
    /// Option symbols in the current subscription.
    pub subscribed_symbols: usize,
    /// Current reconnect attempt (0 while streaming).
    pub reconnect_attempt: u32,
    /// Feed events received.
    pub events_received: u64,
    /// Option updates applied.
    pub exposure_updates: u64,
    /// Reconnects scheduled since start.
    pub reconnects: u64,
    /// Errors since start.
    pub errors: u64,
    /// Most recent error message.
    pub last_error: Option<String>,
}

/// Exposure endpoint response.
#[derive(Debug, Clone, Serialize)]
pub struct ExposureResponse {
    /// Aggregator view.
    #[serde(flatten)]
    pub view: ExposureView,
    /// Open interest and volume by strike.
    pub activity: Vec<StrikeActivity>,
}

/// Stored history index.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryIndex {
    /// Store key (underlying and expiration).
    pub key: String,
    /// Entry timestamps, oldest first.
    pub timestamps: Vec<DateTime<Utc>>,
}

/// One stored entry replayed into a fresh aggregator at the current spot.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntryResponse {
    /// Entry timestamp.
    pub timestamp: DateTime<Utc>,
    /// Rebuilt exposure.
    #[serde(flatten)]
    pub exposure: ExposureResponse,
}

struct HistoryAccess {
    recorder: HistoryRecorder,
    exposure: ExposureConfig,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedStatus>,
    stats: Arc<SupervisorStats>,
    aggregator: Arc<ExposureAggregator>,
    pending: SharedPending,
    history: Option<HistoryAccess>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed: Arc<FeedStatus>,
        stats: Arc<SupervisorStats>,
        aggregator: Arc<ExposureAggregator>,
        pending: SharedPending,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            stats,
            aggregator,
            pending,
            history: None,
        }
    }

    /// Serve stored history through `recorder`, rebuilding exposure with
    /// `exposure` settings.
    #[must_use]
    pub fn with_history(mut self, recorder: HistoryRecorder, exposure: ExposureConfig) -> Self {
        self.history = Some(HistoryAccess { recorder, exposure });
        self
    }

    fn health(&self) -> HealthResponse {
        let feed = self.feed.info(&self.stats);
        let summary = self.aggregator.summary_metrics();
        HealthResponse {
            status: HealthStatus::from(self.feed.state()),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            feed,
            tracked_options: summary.tracked_option_count,
            spot_price: self.aggregator.spot_price(),
        }
    }

    fn exposure(&self) -> ExposureResponse {
        let activity = self.pending.lock().activity_by_strike();
        ExposureResponse {
            view: self.aggregator.view(),
            activity,
        }
    }

    /// `None` when no history is configured.
    async fn history_index(&self) -> Result<Option<HistoryIndex>, HistoryError> {
        let Some(history) = &self.history else {
            return Ok(None);
        };
        let timestamps = history.recorder.timestamps().await?;
        Ok(Some(HistoryIndex {
            key: history.recorder.key().to_string(),
            timestamps,
        }))
    }

    /// `None` when no history is configured or nothing is stored at `timestamp`.
    async fn history_entry(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HistoryEntryResponse>, HistoryError> {
        let Some(history) = &self.history else {
            return Ok(None);
        };
        let Some(payload) = history.recorder.load(timestamp).await? else {
            return Ok(None);
        };

        let aggregator =
            ExposureAggregator::new(self.aggregator.spot_price(), history.exposure.clone());
        aggregator.replay(&payload);
        let mut pending = PendingUpdates::new();
        pending.seed(&payload);

        Ok(Some(HistoryEntryResponse {
            timestamp,
            exposure: ExposureResponse {
                view: aggregator.view(),
                activity: pending.activity_by_strike(),
            },
        }))
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/exposure", get(exposure_handler))
        .route("/history", get(history_index_handler))
        .route("/history/{timestamp}", get(history_entry_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = state.health();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.state() == ConnectionState::Streaming {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn exposure_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.exposure())
}

async fn history_index_handler(State(state): State<Arc<HealthServerState>>) -> Response {
    match state.history_index().await {
        Ok(Some(index)) => Json(index).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "History not configured").into_response(),
        Err(e) => history_failure(&e),
    }
}

async fn history_entry_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(raw): Path<String>,
) -> Response {
    let Some(timestamp) = parse_timestamp(&raw) else {
        return (StatusCode::BAD_REQUEST, "Timestamp must be RFC 3339").into_response();
    };
    match state.history_entry(timestamp).await {
        Ok(Some(entry)) => Json(entry).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No history entry").into_response(),
        Err(e) => history_failure(&e),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn history_failure(e: &HistoryError) -> Response {
    tracing::warn!(error = %e, "History lookup failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use chrono::TimeZone;

    use super::*;
    use crate::application::ports::HistoryStore;
    use crate::domain::exposure::{HistoryPayload, OptionMarketData};
    use crate::domain::feed::FeedEvent;
    use crate::infrastructure::persistence::InMemoryHistoryStore;

    fn state() -> HealthServerState {
        let aggregator = Arc::new(ExposureAggregator::new(6000.0, ExposureConfig::default()));
        HealthServerState::new(
            "0.1.0".to_string(),
            Arc::new(FeedStatus::new()),
            Arc::new(SupervisorStats::default()),
            aggregator,
            Arc::new(Mutex::new(PendingUpdates::new())),
        )
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_connection_state() {
        assert_eq!(
            HealthStatus::from(ConnectionState::Streaming),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::from(ConnectionState::AuthPending),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::from(ConnectionState::Disconnected),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn feed_status_records_events() {
        let feed = FeedStatus::new();
        feed.apply(&SupervisorEvent::Reconnecting {
            attempt: 3,
            delay: Duration::from_secs(20),
        });
        feed.apply(&SupervisorEvent::Error("connection reset".to_string()));
        feed.apply(&SupervisorEvent::CenterResolved(CenterPrice {
            price: Decimal::from(6000),
            midpoint: Some(6001.25),
        }));
        feed.apply(&SupervisorEvent::Subscribed { symbols: 204 });

        let info = feed.info(&SupervisorStats::default());
        assert_eq!(info.reconnect_attempt, 3);
        assert_eq!(info.last_error.as_deref(), Some("connection reset"));
        assert_eq!(info.center_price.as_deref(), Some("6000"));
        assert!(info.center_from_quote);
        assert_eq!(info.subscribed_symbols, 204);
        assert!(!info.connected);

        feed.apply(&SupervisorEvent::StateChanged(ConnectionState::Streaming));
        let info = feed.info(&SupervisorStats::default());
        assert!(info.connected);
        assert_eq!(info.reconnect_attempt, 0);
    }

    #[test]
    fn health_response_reports_spot_and_state() {
        let state = state();
        let response = state.health();
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.spot_price, 6000.0);
        assert_eq!(response.tracked_options, 0);
        assert_eq!(response.feed.state, "disconnected");
    }

    #[test]
    fn exposure_response_flattens_view() {
        let state = state();
        state
            .aggregator
            .update_option(".SPXW251214C6000", Some(0.01), Some(1000.0));
        let _ = state.pending.lock().apply(&FeedEvent::Summary {
            symbol: ".SPXW251214C6000".to_string(),
            open_interest: Some(1000.0),
        });

        let json = serde_json::to_value(state.exposure()).unwrap();
        assert_eq!(json["strikes"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["summary"]["tracked_option_count"], 1);
        assert_eq!(json["activity"][0]["call_open_interest"], 1000.0);
    }

    #[test]
    fn timestamps_parse_as_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2025-12-14T15:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-12-14T10:30:00-05:00"), Some(expected));
        assert_eq!(parse_timestamp("20251214T153000Z"), None);
    }

    #[tokio::test]
    async fn history_unconfigured_is_none() {
        let state = state();
        assert!(state.history_index().await.unwrap().is_none());
        assert!(state.history_entry(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_entry_rebuilds_exposure() {
        let at = Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 0).unwrap();
        let mut payload = HistoryPayload::new();
        payload.insert(
            ".SPXW251214C6000".to_string(),
            OptionMarketData {
                gamma: Some(0.01),
                open_interest: Some(1000.0),
                ..OptionMarketData::default()
            },
        );
        let store = Arc::new(InMemoryHistoryStore::new());
        store.save("SPX:251214", at, &payload).await.unwrap();

        let recorder = HistoryRecorder::new(store, "SPX", "251214");
        let state = state().with_history(recorder, ExposureConfig::default());

        let index = state.history_index().await.unwrap().unwrap();
        assert_eq!(index.key, "SPX:251214");
        assert_eq!(index.timestamps, vec![at]);

        let entry = state.history_entry(at).await.unwrap().unwrap();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["strikes"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["summary"]["tracked_option_count"], 1);
        assert_eq!(json["activity"][0]["call_open_interest"], 1000.0);
        // 0.01 * 1000 * 100 * 6000
        assert!((entry.exposure.view.summary.total_call_gex - 6_000_000.0).abs() < 1e-6);

        // Live state is untouched.
        assert_eq!(state.aggregator.summary_metrics().tracked_option_count, 0);
        assert!(state.history_entry(at + chrono::Duration::minutes(1)).await.unwrap().is_none());
    }
}
