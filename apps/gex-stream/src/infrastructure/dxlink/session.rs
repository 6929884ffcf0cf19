//! dxLink Feed Session
//!
//! One WebSocket connection to a dxLink endpoint, driven through the
//! handshake and then used for subscription requests and event frames.
//!
//! # Handshake
//!
//! ```text
//! Connecting    ── transport (connect timeout)
//! AuthPending   ── SETUP ─► ◄─ AUTH_STATE [─► AUTH ◄─ AUTH_STATE]
//! Subscribing   ── CHANNEL_REQUEST ─► ◄─ CHANNEL_OPENED ── FEED_SETUP ─►
//! Streaming
//! ```
//!
//! Each of the authorization and channel steps has its own deadline. While
//! streaming, keepalives are answered and sent inline by
//! [`DxLinkSession::receive`], so the session needs no helper task.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::auth::{AuthAction, AuthHandler};
use super::codec::JsonCodec;
use super::keepalive::{KeepaliveAction, KeepaliveConfig, KeepaliveTracker};
use super::messages::{AuthStatus, DxLinkMessage, FEED_CHANNEL};
use crate::application::ports::{FeedConnector, FeedPort, TokenProvider};
use crate::domain::feed::{
    ChannelEvent, ConnectionState, FeedError, FeedMessage, SubscriptionEntry,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for a dxLink endpoint.
#[derive(Debug, Clone)]
pub struct DxLinkConfig {
    /// WebSocket URL.
    pub url: String,
    /// Limit for establishing the transport.
    pub connect_timeout: Duration,
    /// Limit for each handshake step.
    pub handshake_timeout: Duration,
    /// Keepalive timing once streaming.
    pub keepalive: KeepaliveConfig,
}

impl DxLinkConfig {
    /// Settings with default timeouts for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// An open dxLink session.
pub struct DxLinkSession {
    ws: WsStream,
    codec: JsonCodec,
    state: ConnectionState,
    keepalive: KeepaliveTracker,
    handshake_timeout: Duration,
}

impl std::fmt::Debug for DxLinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DxLinkSession")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DxLinkSession {
    /// Connect, authorize and open the feed channel.
    ///
    /// # Errors
    ///
    /// - [`FeedError::Timeout`] if the transport or a handshake step is too slow
    /// - [`FeedError::Connect`] if the transport cannot be established
    /// - [`FeedError::Unauthorized`] if the token is rejected
    /// - [`FeedError::ProtocolViolation`] on an `ERROR` frame or unexpected channel
    pub async fn connect(
        config: &DxLinkConfig,
        tokens: &dyn TokenProvider,
    ) -> Result<Self, FeedError> {
        tracing::info!(url = %config.url, "Connecting to dxLink");

        let (ws, _response) = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        .map_err(|_| FeedError::Timeout { stage: "connect" })?
        .map_err(|e| FeedError::Connect(e.to_string()))?;

        let mut session = Self {
            ws,
            codec: JsonCodec::new(),
            state: ConnectionState::Connecting,
            keepalive: KeepaliveTracker::new(config.keepalive, Instant::now()),
            handshake_timeout: config.handshake_timeout,
        };

        if let Err(e) = session.handshake(config, tokens).await {
            tracing::warn!(error = %e, state = %session.state, "dxLink handshake failed");
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn handshake(
        &mut self,
        config: &DxLinkConfig,
        tokens: &dyn TokenProvider,
    ) -> Result<(), FeedError> {
        let timeout_secs = config.keepalive.timeout.as_secs();
        self.send_frame(&DxLinkMessage::setup(timeout_secs, timeout_secs))
            .await?;
        self.state = ConnectionState::AuthPending;

        let deadline = Instant::now() + self.handshake_timeout;
        let mut auth = AuthHandler::new();
        while !auth.is_authorized() {
            match self.handshake_frame("authorization", deadline).await? {
                DxLinkMessage::AuthState { state, .. } => {
                    if auth.on_auth_state(state)? == AuthAction::SendToken {
                        let token = tokens.token().await?;
                        self.send_frame(&DxLinkMessage::auth(token)).await?;
                        tracing::debug!("Sent dxLink token");
                    }
                }
                DxLinkMessage::Setup {
                    version,
                    keepalive_timeout,
                    ..
                } => {
                    tracing::debug!(%version, keepalive_timeout, "dxLink server setup");
                }
                other => {
                    tracing::trace!(frame = other.type_name(), "Ignoring frame during authorization");
                }
            }
        }
        tracing::info!("dxLink authorized");

        self.state = ConnectionState::Subscribing;
        self.send_frame(&DxLinkMessage::feed_channel_request())
            .await?;

        let deadline = Instant::now() + self.handshake_timeout;
        loop {
            match self.handshake_frame("channel opened", deadline).await? {
                DxLinkMessage::ChannelOpened { channel } if channel == FEED_CHANNEL => break,
                DxLinkMessage::ChannelOpened { channel } => {
                    return Err(FeedError::ProtocolViolation(format!(
                        "server opened unrequested channel {channel}"
                    )));
                }
                DxLinkMessage::ChannelClosed { channel } if channel == FEED_CHANNEL => {
                    return Err(FeedError::ChannelClosed);
                }
                DxLinkMessage::AuthState {
                    state: AuthStatus::Unauthorized,
                    ..
                } => return Err(FeedError::Unauthorized),
                other => {
                    tracing::trace!(frame = other.type_name(), "Ignoring frame while opening channel");
                }
            }
        }

        self.send_frame(&DxLinkMessage::feed_setup()).await?;
        self.state = ConnectionState::Streaming;
        tracing::info!(channel = FEED_CHANNEL, "dxLink feed channel open");
        Ok(())
    }

    /// Next handshake frame before `deadline`, answering keepalives and
    /// failing on server errors.
    async fn handshake_frame(
        &mut self,
        stage: &'static str,
        deadline: Instant,
    ) -> Result<DxLinkMessage, FeedError> {
        loop {
            let frame = tokio::time::timeout_at(deadline, self.read_frame())
                .await
                .map_err(|_| FeedError::Timeout { stage })??;

            match frame {
                DxLinkMessage::Keepalive { .. } => {
                    self.send_frame(&DxLinkMessage::keepalive()).await?;
                }
                DxLinkMessage::Error { error, message, .. } => {
                    if error == "UNAUTHORIZED" {
                        return Err(FeedError::Unauthorized);
                    }
                    return Err(FeedError::ProtocolViolation(format!("{error}: {message}")));
                }
                other => return Ok(other),
            }
        }
    }

    async fn send_frame(&mut self, message: &DxLinkMessage) -> Result<(), FeedError> {
        let text = self.codec.encode(message)?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        self.keepalive.record_sent(Instant::now());
        Ok(())
    }

    /// Next text frame, decoded. Transport pings are answered here.
    async fn read_frame(&mut self) -> Result<DxLinkMessage, FeedError> {
        loop {
            let Some(frame) = self.ws.next().await else {
                tracing::info!("dxLink stream ended");
                return Err(FeedError::ChannelClosed);
            };
            let frame = frame.map_err(|e| FeedError::Transport(e.to_string()))?;
            self.keepalive.record_received(Instant::now());

            match frame {
                Message::Text(text) => return Ok(self.codec.decode(&text)?),
                Message::Ping(data) => {
                    self.ws
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| FeedError::Transport(e.to_string()))?;
                }
                Message::Close(close) => {
                    tracing::info!(?close, "Server sent close frame");
                    return Err(FeedError::ChannelClosed);
                }
                _ => {}
            }
        }
    }

    const fn is_open(&self) -> bool {
        !matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Disconnected
        )
    }
}

#[async_trait]
impl FeedPort for DxLinkSession {
    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn subscribe(&mut self, entries: &[SubscriptionEntry]) -> Result<(), FeedError> {
        if !self.is_open() {
            return Err(FeedError::Closed);
        }
        tracing::debug!(entries = entries.len(), "Sending feed subscription");
        self.send_frame(&DxLinkMessage::subscribe(entries.to_vec()))
            .await
    }

    async fn receive(&mut self) -> Result<FeedMessage, FeedError> {
        loop {
            if !self.is_open() {
                return Err(FeedError::Closed);
            }

            let deadline = self.keepalive.next_deadline();
            let frame = tokio::select! {
                frame = self.read_frame() => Some(frame),
                () = tokio::time::sleep_until(deadline) => None,
            };

            let Some(frame) = frame else {
                match self.keepalive.check(Instant::now()) {
                    KeepaliveAction::TimedOut => {
                        tracing::warn!("dxLink keepalive timeout");
                        return Err(FeedError::Timeout { stage: "keepalive" });
                    }
                    KeepaliveAction::Send => {
                        self.send_frame(&DxLinkMessage::keepalive()).await?;
                    }
                    KeepaliveAction::Idle => {}
                }
                continue;
            };

            let message = match frame {
                Ok(message) => message,
                Err(FeedError::Codec(reason)) => {
                    tracing::warn!(%reason, "Skipping undecodable dxLink frame");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match message {
                DxLinkMessage::FeedData { .. } => {
                    return Ok(FeedMessage::Data(self.codec.feed_events(message)));
                }
                DxLinkMessage::Keepalive { .. } => {
                    self.send_frame(&DxLinkMessage::keepalive()).await?;
                }
                DxLinkMessage::ChannelOpened { channel } => {
                    return Ok(FeedMessage::Channel(ChannelEvent::Opened { channel }));
                }
                DxLinkMessage::ChannelClosed { channel } => {
                    return Ok(FeedMessage::Channel(ChannelEvent::Closed { channel }));
                }
                DxLinkMessage::Error { error, message, .. } => {
                    return Ok(FeedMessage::Channel(ChannelEvent::Error {
                        kind: error,
                        message,
                    }));
                }
                DxLinkMessage::AuthState {
                    state: AuthStatus::Unauthorized,
                    ..
                } => return Err(FeedError::Unauthorized),
                other => {
                    tracing::trace!(frame = other.type_name(), "Ignoring dxLink frame");
                }
            }
        }
    }

    async fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        self.state = ConnectionState::Closing;
        match tokio::time::timeout(CLOSE_TIMEOUT, self.ws.close(None)).await {
            Ok(Ok(())) => tracing::debug!("dxLink connection closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "dxLink close failed"),
            Err(_) => tracing::debug!("dxLink close timed out"),
        }
        self.state = ConnectionState::Disconnected;
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens [`DxLinkSession`]s for the stream supervisor.
#[derive(Debug, Clone)]
pub struct DxLinkConnector {
    config: DxLinkConfig,
}

impl DxLinkConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: DxLinkConfig) -> Self {
        Self { config }
    }

    /// Connection settings.
    #[must_use]
    pub const fn config(&self) -> &DxLinkConfig {
        &self.config
    }
}

#[async_trait]
impl FeedConnector for DxLinkConnector {
    async fn open(&self, tokens: &dyn TokenProvider) -> Result<Box<dyn FeedPort>, FeedError> {
        let session = DxLinkSession::connect(&self.config, tokens).await?;
        Ok(Box::new(session))
    }
}
