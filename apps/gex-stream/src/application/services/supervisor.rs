//! Stream Supervisor
//!
//! Keeps one feed session alive for the lifetime of a subscription and
//! routes its events into the exposure aggregator.
//!
//! # Design
//!
//! Two tasks cooperate over a bounded channel:
//!
//! ```text
//!  connection task                         dispatcher task
//!  ───────────────                         ───────────────
//!  open ─► resolve center ─► subscribe     recv batch
//!       ─► receive loop ── Vec<FeedEvent> ──► underlying → spot price
//!  on error: backoff, reopen                 option → PendingUpdates
//!                                                   → ExposureAggregator
//! ```
//!
//! The connection task never touches the aggregator lock, so a slow reader
//! can only apply backpressure through the channel. Stopping cancels a
//! token observed at every suspension point of the connection task; the
//! session is closed before the task exits, which drops the channel sender
//! and lets the dispatcher drain and finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::subscription::{CenterPrice, SubscriptionManager};
use crate::application::ports::{FeedConnector, FeedPort, TokenProvider};
use crate::domain::exposure::{ExposureAggregator, PendingUpdates};
use crate::domain::feed::{
    ChannelEvent, ConnectionState, EventKind, FeedError, FeedEvent, FeedMessage,
};
use crate::domain::symbol::{EXPIRATION_LEN, LadderSpec};

/// Merge buffer shared between the dispatcher and readers such as the
/// history recorder.
pub type SharedPending = Arc<Mutex<PendingUpdates>>;

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the supervisor to its host.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// The stream parameters cannot produce a valid subscription.
    #[error("invalid supervisor configuration: {0}")]
    InvalidConfig(String),

    /// The reconnect attempt ceiling was reached.
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Background tasks did not finish within the join timeout.
    #[error("supervisor tasks did not stop within {0:?}")]
    JoinTimeout(Duration),

    /// A background task panicked or was aborted.
    #[error("supervisor task failed: {0}")]
    Join(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Parameters for one supervised stream.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Underlying ticker, e.g. `SPX`.
    pub underlying: String,
    /// Ladder parameters for option symbols.
    pub ladder: LadderSpec,
    /// Center price used when no underlying quote arrives in time.
    pub fallback_price: Decimal,
    /// How long to wait for an underlying quote after connecting.
    pub price_timeout: Duration,
    /// Backoff between reconnect attempts.
    pub reconnect: ReconnectConfig,
    /// Capacity of the event channel between the two tasks, in batches.
    pub event_channel_capacity: usize,
    /// Upper bound on how long [`StreamSupervisor::stop`] waits.
    pub join_timeout: Duration,
}

impl SupervisorConfig {
    /// Default join timeout.
    pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Upper bound on `strikes_up + strikes_down`.
    pub const MAX_LADDER_STRIKES: u32 = 1_000;

    /// Check that the parameters describe a subscribable ladder.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        let invalid = |msg: String| Err(SupervisorError::InvalidConfig(msg));

        if self.underlying.trim().is_empty() {
            return invalid("underlying must not be empty".to_string());
        }
        if self.ladder.prefix.is_empty()
            || !self.ladder.prefix.bytes().all(|b| b.is_ascii_uppercase())
        {
            return invalid(format!(
                "option prefix {:?} must be uppercase letters",
                self.ladder.prefix
            ));
        }
        let expiration = &self.ladder.expiration;
        if expiration.len() != EXPIRATION_LEN
            || NaiveDate::parse_from_str(expiration, "%y%m%d").is_err()
        {
            return invalid(format!("expiration {expiration:?} is not a YYMMDD date"));
        }
        if self.ladder.increment <= Decimal::ZERO {
            return invalid(format!(
                "strike increment {} must be positive",
                self.ladder.increment
            ));
        }
        let strikes = self
            .ladder
            .strikes_up
            .checked_add(self.ladder.strikes_down)
            .filter(|n| *n <= Self::MAX_LADDER_STRIKES);
        if strikes.is_none() {
            return invalid(format!(
                "ladder of {} up and {} down exceeds {} strikes",
                self.ladder.strikes_up,
                self.ladder.strikes_down,
                Self::MAX_LADDER_STRIKES
            ));
        }
        if self.fallback_price <= Decimal::ZERO {
            return invalid(format!(
                "fallback price {} must be positive",
                self.fallback_price
            ));
        }
        if self.event_channel_capacity == 0 {
            return invalid("event channel capacity must be positive".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Events and Statistics
// =============================================================================

/// Status notifications emitted to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// The session moved to a new lifecycle state.
    StateChanged(ConnectionState),
    /// A reconnect was scheduled.
    Reconnecting {
        /// Attempt number since the last healthy session.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The ladder center was resolved.
    CenterResolved(CenterPrice),
    /// The ladder subscription was sent.
    Subscribed {
        /// Number of option symbols requested.
        symbols: usize,
    },
    /// A session failed or the server reported an error.
    Error(String),
}

/// Counters maintained by the supervisor tasks.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    quotes: AtomicU64,
    trades: AtomicU64,
    greeks: AtomicU64,
    summaries: AtomicU64,
    exposure_updates: AtomicU64,
    reconnects: AtomicU64,
    errors: AtomicU64,
}

impl SupervisorStats {
    fn counter(&self, kind: EventKind) -> &AtomicU64 {
        match kind {
            EventKind::Quote => &self.quotes,
            EventKind::Trade => &self.trades,
            EventKind::Greeks => &self.greeks,
            EventKind::Summary => &self.summaries,
        }
    }

    fn record_event(&self, kind: EventKind) {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    /// Events received of one kind.
    #[must_use]
    pub fn events(&self, kind: EventKind) -> u64 {
        self.counter(kind).load(Ordering::Relaxed)
    }

    /// Events received of all kinds.
    #[must_use]
    pub fn total_events(&self) -> u64 {
        EventKind::OPTION_KINDS.iter().map(|k| self.events(*k)).sum()
    }

    /// Option updates applied to the aggregator.
    #[must_use]
    pub fn exposure_updates(&self) -> u64 {
        self.exposure_updates.load(Ordering::Relaxed)
    }

    /// Reconnect attempts scheduled.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Session failures and server-reported errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes decoded events to the spot price, merge buffer and aggregator.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    underlying: String,
    pending: SharedPending,
    aggregator: Arc<ExposureAggregator>,
    stats: Arc<SupervisorStats>,
    spot_observed: Arc<AtomicBool>,
}

impl EventDispatcher {
    /// Create a dispatcher for `underlying`.
    #[must_use]
    pub fn new(
        underlying: impl Into<String>,
        pending: SharedPending,
        aggregator: Arc<ExposureAggregator>,
        stats: Arc<SupervisorStats>,
    ) -> Self {
        Self {
            underlying: underlying.into(),
            pending,
            aggregator,
            stats,
            spot_observed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an underlying price has been applied to the spot.
    #[must_use]
    pub fn spot_observed(&self) -> bool {
        self.spot_observed.load(Ordering::Acquire)
    }

    /// Apply one event.
    pub fn dispatch(&self, event: &FeedEvent) {
        self.stats.record_event(event.kind());

        if event.symbol() == self.underlying {
            let price = match event {
                FeedEvent::Quote { .. } => event.midpoint(),
                FeedEvent::Trade { price, .. } => price.filter(|p| p.is_finite() && *p > 0.0),
                _ => None,
            };
            if let Some(price) = price {
                self.aggregator.set_spot_price(price);
                self.spot_observed.store(true, Ordering::Release);
            }
            return;
        }

        let ready = self.pending.lock().apply(event);
        if let Some(update) = ready
            && self.aggregator.update_option(
                &update.symbol,
                Some(update.gamma),
                Some(update.open_interest),
            )
        {
            self.stats.exposure_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn run(self, mut rx: mpsc::Receiver<Vec<FeedEvent>>) {
        while let Some(batch) = rx.recv().await {
            for event in &batch {
                self.dispatch(event);
            }
        }
        tracing::debug!("Event dispatcher finished");
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct ConnectionTask {
    config: SupervisorConfig,
    connector: Arc<dyn FeedConnector>,
    tokens: Arc<dyn TokenProvider>,
    subscriptions: SubscriptionManager,
    aggregator: Arc<ExposureAggregator>,
    dispatcher: EventDispatcher,
    stats: Arc<SupervisorStats>,
    status_tx: Option<mpsc::Sender<SupervisorEvent>>,
    event_tx: mpsc::Sender<Vec<FeedEvent>>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    fn emit(&self, event: SupervisorEvent) {
        // Status is best effort; a host that stops draining must not stall the feed.
        if let Some(tx) = &self.status_tx
            && tx.try_send(event).is_err()
        {
            tracing::trace!("Status channel full or closed");
        }
    }

    async fn run(self) -> Result<(), SupervisorError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream supervisor cancelled");
                break;
            }

            match self.connect_and_stream(&mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, kind = e.kind(), "Feed session failed");
                    self.emit(SupervisorEvent::StateChanged(ConnectionState::Disconnected));
                    self.emit(SupervisorEvent::Error(e.to_string()));

                    if !e.is_retryable() {
                        break;
                    }
                    let Some(delay) = policy.next_delay() else {
                        let attempts = policy.attempt_count();
                        tracing::error!(attempts, "Reconnect attempts exhausted");
                        return Err(SupervisorError::RetriesExhausted { attempts });
                    };

                    let attempt = policy.attempt_count();
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to feed"
                    );
                    self.emit(SupervisorEvent::Reconnecting { attempt, delay });

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Stream supervisor cancelled during reconnect delay");
                            break;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.emit(SupervisorEvent::StateChanged(ConnectionState::Disconnected));
        Ok(())
    }

    /// Run one session until cancellation (`Ok`) or failure (`Err`).
    async fn connect_and_stream(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedError> {
        self.emit(SupervisorEvent::StateChanged(ConnectionState::Connecting));

        let mut session = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            opened = self.connector.open(self.tokens.as_ref()) => opened?,
        };
        self.emit(SupervisorEvent::StateChanged(session.state()));

        let result = self.stream(session.as_mut(), policy).await;

        self.emit(SupervisorEvent::StateChanged(ConnectionState::Closing));
        session.close().await;
        result
    }

    async fn stream(
        &self,
        session: &mut dyn FeedPort,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), FeedError> {
        let center = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            center = self.subscriptions.resolve_center_price(
                &mut *session,
                self.config.price_timeout,
                self.config.fallback_price,
            ) => center?,
        };
        self.emit(SupervisorEvent::CenterResolved(center));
        if let Some(midpoint) = center.midpoint
            && !self.dispatcher.spot_observed()
        {
            self.aggregator.set_spot_price(midpoint);
        }

        let symbols = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            symbols = self.subscriptions.subscribe(&mut *session, center.price) => symbols?,
        };
        self.emit(SupervisorEvent::Subscribed {
            symbols: symbols.len(),
        });
        self.emit(SupervisorEvent::StateChanged(ConnectionState::Streaming));
        policy.reset();

        loop {
            let message = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                message = session.receive() => message?,
            };

            match message {
                FeedMessage::Data(events) => {
                    if events.is_empty() {
                        continue;
                    }
                    if self.event_tx.send(events).await.is_err() {
                        return Err(FeedError::Closed);
                    }
                }
                FeedMessage::Channel(ChannelEvent::Closed { channel }) => {
                    tracing::warn!(channel, "Feed channel closed by server");
                    return Err(FeedError::ChannelClosed);
                }
                FeedMessage::Channel(ChannelEvent::Error { kind, message }) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(kind = %kind, message = %message, "Feed reported error");
                    self.emit(SupervisorEvent::Error(format!("{kind}: {message}")));
                }
                FeedMessage::Channel(ChannelEvent::Opened { channel }) => {
                    tracing::debug!(channel, "Feed channel opened");
                }
            }
        }
    }
}

// =============================================================================
// Stream Supervisor
// =============================================================================

/// Owns the background tasks streaming one underlying/expiration.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use gex_stream::application::ports::{FeedConnector, TokenProvider};
/// use gex_stream::application::services::supervisor::{StreamSupervisor, SupervisorConfig};
/// use gex_stream::domain::exposure::{ExposureAggregator, ExposureConfig};
///
/// async fn example(
///     config: SupervisorConfig,
///     connector: Arc<dyn FeedConnector>,
///     tokens: Arc<dyn TokenProvider>,
/// ) -> Result<(), Box<dyn std::error::Error>> {
///     let aggregator = Arc::new(ExposureAggregator::new(6000.0, ExposureConfig::default()));
///     let supervisor = StreamSupervisor::start(config, connector, tokens, aggregator, None)?;
///
///     tokio::signal::ctrl_c().await?;
///     supervisor.stop().await?;
///     Ok(())
/// }
/// ```
pub struct StreamSupervisor {
    cancel: CancellationToken,
    finished: CancellationToken,
    connection: JoinHandle<Result<(), SupervisorError>>,
    dispatcher: JoinHandle<()>,
    pending: SharedPending,
    stats: Arc<SupervisorStats>,
    join_timeout: Duration,
}

impl StreamSupervisor {
    /// Validate the configuration and spawn the connection and dispatcher tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::InvalidConfig`] if validation fails; nothing
    /// is spawned in that case.
    pub fn start(
        config: SupervisorConfig,
        connector: Arc<dyn FeedConnector>,
        tokens: Arc<dyn TokenProvider>,
        aggregator: Arc<ExposureAggregator>,
        status_tx: Option<mpsc::Sender<SupervisorEvent>>,
    ) -> Result<Self, SupervisorError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let pending: SharedPending = Arc::new(Mutex::new(PendingUpdates::new()));
        let stats = Arc::new(SupervisorStats::default());
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let dispatcher = EventDispatcher::new(
            config.underlying.clone(),
            Arc::clone(&pending),
            Arc::clone(&aggregator),
            Arc::clone(&stats),
        );
        let join_timeout = config.join_timeout;

        tracing::info!(
            underlying = %config.underlying,
            expiration = %config.ladder.expiration,
            strikes_up = config.ladder.strikes_up,
            strikes_down = config.ladder.strikes_down,
            "Starting stream supervisor"
        );

        let task = ConnectionTask {
            subscriptions: SubscriptionManager::new(
                config.underlying.clone(),
                config.ladder.clone(),
            ),
            config,
            connector,
            tokens,
            aggregator,
            dispatcher: dispatcher.clone(),
            stats: Arc::clone(&stats),
            status_tx,
            event_tx,
            cancel: cancel.clone(),
        };

        let done = finished.clone();
        let connection = tokio::spawn(async move {
            let result = task.run().await;
            done.cancel();
            result
        });
        let dispatcher = tokio::spawn(dispatcher.run(event_rx));

        Ok(Self {
            cancel,
            finished,
            connection,
            dispatcher,
            pending,
            stats,
            join_timeout,
        })
    }

    /// Token cancelled once the connection task has exited on its own or
    /// after [`StreamSupervisor::stop`].
    #[must_use]
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Shared merge buffer.
    #[must_use]
    pub fn pending(&self) -> SharedPending {
        Arc::clone(&self.pending)
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> Arc<SupervisorStats> {
        Arc::clone(&self.stats)
    }

    /// Signal both tasks to exit and wait up to the join timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::JoinTimeout`] if the tasks do not finish in
    /// time, [`SupervisorError::Join`] if one panicked, or the connection
    /// task's own terminal error.
    pub async fn stop(self) -> Result<(), SupervisorError> {
        tracing::info!("Stopping stream supervisor");
        self.cancel.cancel();

        let Self {
            connection,
            dispatcher,
            join_timeout,
            ..
        } = self;

        let connection_abort = connection.abort_handle();
        let dispatcher_abort = dispatcher.abort_handle();
        let joined = tokio::time::timeout(join_timeout, async {
            let connection = connection.await;
            let dispatcher = dispatcher.await;
            (connection, dispatcher)
        })
        .await;

        let Ok((connection, dispatcher)) = joined else {
            connection_abort.abort();
            dispatcher_abort.abort();
            return Err(SupervisorError::JoinTimeout(join_timeout));
        };

        dispatcher.map_err(|e| SupervisorError::Join(e.to_string()))?;
        connection.map_err(|e| SupervisorError::Join(e.to_string()))?
    }
}

// =============================================================================
// Tests
// =============================================================================
