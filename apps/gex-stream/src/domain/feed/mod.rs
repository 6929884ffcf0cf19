//! Normalized Feed Types
//!
//! Codec-agnostic representation of what the streaming feed delivers:
//! per-symbol market data events, subscription entries, channel events and
//! the session connection state. Wire frames are decoded into these types by
//! the infrastructure layer.

mod error;

pub use error::FeedError;

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Event Kinds
// =============================================================================

/// Market data event kinds the feed can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Top-of-book bid/ask.
    Quote,
    /// Last trade and cumulative day volume.
    Trade,
    /// Option greeks supplied by the feed.
    Greeks,
    /// Daily summary (open interest).
    Summary,
}

impl EventKind {
    /// Event kinds requested for every option contract, in request order.
    pub const OPTION_KINDS: [Self; 4] = [Self::Quote, Self::Trade, Self::Greeks, Self::Summary];

    /// Wire name of the event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "Quote",
            Self::Trade => "Trade",
            Self::Greeks => "Greeks",
            Self::Summary => "Summary",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{symbol, type}` pair in a subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Event symbol (option symbol or underlying ticker).
    pub symbol: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
}

impl SubscriptionEntry {
    /// Create a subscription entry.
    #[must_use]
    pub fn new(symbol: impl Into<String>, kind: EventKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
        }
    }
}

// =============================================================================
// Feed Events
// =============================================================================

/// A normalized market data event.
///
/// Numeric fields are `None` when the feed omitted them or sent a
/// non-numeric / non-finite value.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Bid/ask update.
    Quote {
        /// Event symbol.
        symbol: String,
        /// Best bid.
        bid_price: Option<f64>,
        /// Best ask.
        ask_price: Option<f64>,
    },
    /// Trade update.
    Trade {
        /// Event symbol.
        symbol: String,
        /// Last trade price.
        price: Option<f64>,
        /// Cumulative volume for the day.
        day_volume: Option<f64>,
    },
    /// Greeks update.
    Greeks {
        /// Event symbol.
        symbol: String,
        /// Gamma.
        gamma: Option<f64>,
        /// Delta.
        delta: Option<f64>,
        /// Implied volatility.
        volatility: Option<f64>,
    },
    /// Summary update.
    Summary {
        /// Event symbol.
        symbol: String,
        /// Open interest.
        open_interest: Option<f64>,
    },
}

impl FeedEvent {
    /// Symbol this event refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Quote { symbol, .. }
            | Self::Trade { symbol, .. }
            | Self::Greeks { symbol, .. }
            | Self::Summary { symbol, .. } => symbol,
        }
    }

    /// Kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Quote { .. } => EventKind::Quote,
            Self::Trade { .. } => EventKind::Trade,
            Self::Greeks { .. } => EventKind::Greeks,
            Self::Summary { .. } => EventKind::Summary,
        }
    }

    /// Bid/ask midpoint for a quote carrying both sides.
    #[must_use]
    pub fn midpoint(&self) -> Option<f64> {
        match self {
            Self::Quote {
                bid_price: Some(bid),
                ask_price: Some(ask),
                ..
            } if *bid > 0.0 && *ask > 0.0 => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

// =============================================================================
// Feed Messages
// =============================================================================

/// Channel-level notifications surfaced while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The server (re)opened a channel.
    Opened {
        /// Channel id.
        channel: u32,
    },
    /// The server closed a channel.
    Closed {
        /// Channel id.
        channel: u32,
    },
    /// The server reported an error.
    Error {
        /// Error kind reported by the server.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

/// A substantive message returned by a session receive.
///
/// Keepalive requests never appear here; sessions answer them internally.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Batch of market data events.
    Data(Vec<FeedEvent>),
    /// Channel notification.
    Channel(ChannelEvent),
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Establishing the transport.
    Connecting,
    /// Setup sent, waiting for authorization.
    AuthPending,
    /// Authorized, opening the data channel.
    Subscribing,
    /// Data channel open, exchanging frames.
    Streaming,
    /// Shutting down.
    Closing,
}

impl ConnectionState {
    /// State name for logs and status endpoints.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AuthPending => "auth_pending",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
        }
    }

    /// Numeric code used for the connection state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::AuthPending => 2,
            Self::Subscribing => 3,
            Self::Streaming => 4,
            Self::Closing => 5,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
