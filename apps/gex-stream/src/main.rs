//! GEX Stream Binary
//!
//! Streams a strike ladder from dxLink and serves live gamma exposure.
//!
//! # Usage
//!
//! ```bash
//! DXLINK_TOKEN=... cargo run --bin gex-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DXLINK_TOKEN`: dxLink streamer token
//!
//! ## Optional
//! - `DXLINK_URL`: Feed endpoint
//! - `GEX_UNDERLYING`: SPX | NDX | SPY | QQQ | IWM | DIA | other (default: SPX)
//! - `GEX_EXPIRATION`: YYMMDD (default: today)
//! - `GEX_STRIKES_UP` / `GEX_STRIKES_DOWN`: Ladder size (default: 25)
//! - `GEX_HEALTH_PORT`: Health, metrics and exposure HTTP port (default: 8083)
//! - `GEX_HISTORY_DIR`: History directory (default: `data/history`, empty keeps it in memory)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log filter (default: `gex_stream=info`)
//!
//! See `StreamConfig` for the full list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gex_stream::application::ports::{FeedConnector, HistoryStore, TokenProvider};
use gex_stream::application::services::{
    HistoryRecorder, StreamSupervisor, SupervisorEvent, SupervisorStats,
};
use gex_stream::domain::exposure::ExposureAggregator;
use gex_stream::infrastructure::dxlink::{DxLinkConnector, StaticTokenProvider};
use gex_stream::infrastructure::health::{FeedStatus, HealthServer, HealthServerState};
use gex_stream::infrastructure::metrics;
use gex_stream::infrastructure::persistence::{FileHistoryStore, InMemoryHistoryStore};
use gex_stream::infrastructure::telemetry;
use gex_stream::{StreamConfig, init_metrics};
use rust_decimal::prelude::ToPrimitive;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Time allowed for background tasks to finish after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the supervisor status channel.
const STATUS_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!("Starting GEX stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = StreamConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    let fallback_spot = config.stream.fallback_price.to_f64().unwrap_or_default();
    let aggregator = Arc::new(ExposureAggregator::new(
        fallback_spot,
        config.exposure_config(),
    ));

    let store: Arc<dyn HistoryStore> = match &config.history.directory {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Persisting history to disk");
            Arc::new(FileHistoryStore::new(dir))
        }
        None => {
            tracing::info!("Keeping history in memory");
            Arc::new(InMemoryHistoryStore::new())
        }
    };
    let recorder = HistoryRecorder::new(
        store,
        &config.stream.underlying,
        &config.stream.expiration,
    );
    let restored = match recorder.restore_latest(&aggregator).await {
        Ok(restored) => restored,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to restore history");
            None
        }
    };

    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new(config.feed.token())?);
    let connector: Arc<dyn FeedConnector> = Arc::new(DxLinkConnector::new(config.dxlink_config()));
    let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);

    let supervisor = StreamSupervisor::start(
        config.supervisor_config(),
        connector,
        tokens,
        Arc::clone(&aggregator),
        Some(status_tx),
    )?;

    if let Some(restored) = restored {
        let seeded = supervisor.pending().lock().seed(&restored.payload);
        tracing::debug!(seeded, "Seeded merge buffer from history");
    }

    let shutdown_token = CancellationToken::new();
    let feed_status = Arc::new(FeedStatus::new());
    let stats = supervisor.stats();

    tokio::spawn(handle_status_events(status_rx, Arc::clone(&feed_status)));

    tokio::spawn(run_snapshots(
        Arc::clone(&aggregator),
        Arc::clone(&stats),
        config.history.snapshot_interval,
        shutdown_token.clone(),
    ));

    let health_state = Arc::new(
        HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&feed_status),
            Arc::clone(&stats),
            Arc::clone(&aggregator),
            supervisor.pending(),
        )
        .with_history(recorder.clone(), config.exposure_config()),
    );

    let recorder_task = tokio::spawn(recorder.run(
        supervisor.pending(),
        config.history.record_interval,
        shutdown_token.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("GEX stream ready");

    let finished = supervisor.finished();
    tokio::select! {
        () = await_shutdown_signal() => {}
        () = finished.cancelled() => {
            tracing::error!("Stream supervisor exited");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    shutdown_token.cancel();
    let result = supervisor.stop().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, recorder_task)
        .await
        .is_err()
    {
        tracing::warn!("History recorder did not finish in time");
    }

    tracing::info!("{}", aggregator.summary_metrics());
    tracing::info!("GEX stream stopped");

    result.context("stream supervisor failed")
}

/// Record supervisor status events for the health server and metrics.
async fn handle_status_events(mut rx: mpsc::Receiver<SupervisorEvent>, feed_status: Arc<FeedStatus>) {
    while let Some(event) = rx.recv().await {
        match &event {
            SupervisorEvent::StateChanged(state) => {
                metrics::set_connection_state(*state);
                tracing::debug!(state = state.as_str(), "Feed state changed");
            }
            SupervisorEvent::Reconnecting { attempt, delay } => {
                tracing::info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Feed reconnecting"
                );
            }
            SupervisorEvent::CenterResolved(center) => {
                tracing::info!(
                    center = %center.price,
                    fallback = center.is_fallback(),
                    "Ladder center resolved"
                );
            }
            SupervisorEvent::Subscribed { symbols } => {
                tracing::info!(symbols, "Ladder subscribed");
            }
            SupervisorEvent::Error(message) => {
                tracing::warn!(error = %message, "Feed error");
            }
        }
        feed_status.apply(&event);
    }
}

/// Take throttled history snapshots and publish metrics until cancelled.
async fn run_snapshots(
    aggregator: Arc<ExposureAggregator>,
    stats: Arc<SupervisorStats>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        aggregator.take_time_series_snapshot();
        metrics::publish_stats(&stats);
        metrics::publish_summary(&aggregator.summary_metrics(), aggregator.spot_price());
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        underlying = %config.stream.underlying,
        option_prefix = %config.stream.option_prefix,
        expiration = %config.stream.expiration,
        strikes_up = config.stream.strikes_up,
        strikes_down = config.stream.strikes_down,
        increment = %config.stream.strike_increment,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(url = %config.feed.url, "Feed endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
