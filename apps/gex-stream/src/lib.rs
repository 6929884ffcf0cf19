#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::unreadable_literal
    )
)]

//! GEX Stream - Live Dealer Gamma Exposure
//!
//! Holds one dxLink WebSocket session to an options feed, subscribes to a
//! strike ladder around the underlying's price, merges Greeks and open
//! interest per contract, and keeps gamma exposure by strike, portfolio
//! summary metrics and a rolling net exposure history up to date.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and calculations
//!   - `symbol`: Option symbol codec and strike ladders
//!   - `feed`: Normalized feed events, connection state, feed errors
//!   - `exposure`: Exposure aggregator and per-contract merge buffer
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Token provider, feed session, connector, history store
//!   - `services`: Subscription planning, reconnect policy, stream
//!     supervisor, history recorder
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `dxlink`: WebSocket session, codec, auth and keepalive
//!   - `persistence`: File and in-memory history stores
//!   - `config`: Environment configuration
//!   - `health`: Health, metrics, exposure and history HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! dxLink WS ──► DxLinkSession ──► ConnectionTask ──mpsc──► EventDispatcher
//!                                                              │
//!                                      spot price ◄────────────┤
//!                                                              ▼
//!                                 PendingUpdates ──► ExposureAggregator ──► /exposure
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::exposure::{
    ExposureAggregator, ExposureConfig, ExposureView, HistoryPayload, OptionMarketData,
    PendingUpdates, StrikeActivity, StrikeRow, SummaryMetrics, TimeSeriesSnapshot,
};
pub use domain::feed::{ConnectionState, EventKind, FeedError, FeedEvent, SubscriptionEntry};
pub use domain::symbol::{LadderSpec, OptionRight, OptionSymbol};

// Ports and services
pub use application::ports::{FeedConnector, FeedPort, HistoryStore, TokenProvider};
pub use application::services::{
    HistoryRecorder, ReconnectConfig, StreamSupervisor, SupervisorConfig, SupervisorError,
    SupervisorEvent, SupervisorStats,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamConfig};

// dxLink adapter
pub use infrastructure::dxlink::{DxLinkConfig, DxLinkConnector, StaticTokenProvider};

// Health server
pub use infrastructure::health::{FeedStatus, HealthServer, HealthServerError, HealthServerState};

// History store
pub use infrastructure::persistence::{FileHistoryStore, InMemoryHistoryStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
