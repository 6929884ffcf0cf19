//! dxLink Wire Messages
//!
//! JSON frames exchanged with a dxLink WebSocket endpoint. Every frame is an
//! object with a `type` discriminator and a `channel` number; channel 0
//! carries connection control, channel 1 is the market data feed opened by
//! this client.
//!
//! # Message Types
//!
//! ## Connection (channel 0)
//! - `SETUP`: protocol version and keepalive timeouts (both directions)
//! - `AUTH_STATE`: server's view of authorization
//! - `AUTH`: token sent by the client
//! - `KEEPALIVE`: liveness ping (both directions)
//! - `ERROR`: server-reported error
//!
//! ## Feed channel (channel 1)
//! - `CHANNEL_REQUEST` / `CHANNEL_OPENED` / `CHANNEL_CLOSED`
//! - `FEED_SETUP` / `FEED_CONFIG`: data format negotiation
//! - `FEED_SUBSCRIPTION`: subscription changes
//! - `FEED_DATA`: market data events
//!
//! # Numeric Fields
//!
//! Event fields arrive as JSON numbers, numeric strings or the strings
//! `"NaN"` / `"Infinity"`. All of them decode to `Option<f64>`; anything that
//! is not a finite number decodes to `None`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::feed::{EventKind, FeedEvent, SubscriptionEntry};

// =============================================================================
// Constants
// =============================================================================

/// Connection control channel.
pub const CONTROL_CHANNEL: u32 = 0;

/// Market data channel requested by this client.
pub const FEED_CHANNEL: u32 = 1;

/// Feed service name used in channel requests.
pub const FEED_SERVICE: &str = "FEED";

/// Client version reported in `SETUP`.
pub const CLIENT_VERSION: &str = concat!("gex-stream/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Frames
// =============================================================================

/// Authorization state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    /// A token is required.
    Unauthorized,
    /// The connection may open channels.
    Authorized,
}

/// Parameters of a channel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParameters {
    /// Feed contract, `AUTO` lets the server choose.
    pub contract: String,
}

impl Default for ChannelParameters {
    fn default() -> Self {
        Self {
            contract: "AUTO".to_string(),
        }
    }
}

/// A dxLink frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DxLinkMessage {
    /// Protocol setup.
    #[serde(rename_all = "camelCase")]
    Setup {
        /// Always the control channel.
        channel: u32,
        /// Seconds of silence after which the sender drops the connection.
        keepalive_timeout: u64,
        /// Seconds of silence the sender accepts from its peer.
        accept_keepalive_timeout: u64,
        /// Protocol/client version string.
        version: String,
    },

    /// Authorization state.
    AuthState {
        /// Always the control channel.
        channel: u32,
        /// Current state.
        state: AuthStatus,
    },

    /// Client token.
    Auth {
        /// Always the control channel.
        channel: u32,
        /// Bearer token.
        token: String,
    },

    /// Request to open a service channel.
    ChannelRequest {
        /// Channel id chosen by the client.
        channel: u32,
        /// Service name.
        service: String,
        /// Service parameters.
        parameters: ChannelParameters,
    },

    /// Server confirmation of an opened channel.
    ChannelOpened {
        /// Channel id.
        channel: u32,
    },

    /// Server closed a channel.
    ChannelClosed {
        /// Channel id.
        channel: u32,
    },

    /// Client cancelled a channel.
    ChannelCancel {
        /// Channel id.
        channel: u32,
    },

    /// Data format negotiation.
    #[serde(rename_all = "camelCase")]
    FeedSetup {
        /// Feed channel.
        channel: u32,
        /// Requested aggregation period in seconds.
        accept_aggregation_period: f64,
        /// `FULL` (objects) or `COMPACT` (arrays).
        accept_data_format: String,
        /// Fields requested per event type.
        accept_event_fields: BTreeMap<String, Vec<String>>,
    },

    /// Server's effective feed configuration.
    #[serde(rename_all = "camelCase")]
    FeedConfig {
        /// Feed channel.
        channel: u32,
        /// Effective data format.
        #[serde(default)]
        data_format: Option<String>,
    },

    /// Subscription change.
    FeedSubscription {
        /// Feed channel.
        channel: u32,
        /// Entries to add.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        add: Vec<SubscriptionEntry>,
        /// Entries to remove.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        remove: Vec<SubscriptionEntry>,
        /// Drop every existing subscription first.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reset: Option<bool>,
    },

    /// Market data events.
    FeedData {
        /// Feed channel.
        channel: u32,
        /// Events in this frame.
        #[serde(default)]
        data: Vec<EventPayload>,
    },

    /// Liveness ping.
    Keepalive {
        /// Always the control channel.
        channel: u32,
    },

    /// Server-reported error.
    Error {
        /// Channel the error relates to.
        #[serde(default)]
        channel: u32,
        /// Error kind, e.g. `UNAUTHORIZED`.
        #[serde(default)]
        error: String,
        /// Human-readable description.
        #[serde(default)]
        message: String,
    },

    /// Any frame type this client does not handle.
    #[serde(other)]
    Unknown,
}

impl DxLinkMessage {
    /// Client `SETUP` frame.
    #[must_use]
    pub fn setup(keepalive_timeout: u64, accept_keepalive_timeout: u64) -> Self {
        Self::Setup {
            channel: CONTROL_CHANNEL,
            keepalive_timeout,
            accept_keepalive_timeout,
            version: CLIENT_VERSION.to_string(),
        }
    }

    /// Client `AUTH` frame.
    #[must_use]
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            channel: CONTROL_CHANNEL,
            token: token.into(),
        }
    }

    /// Request for the feed channel.
    #[must_use]
    pub fn feed_channel_request() -> Self {
        Self::ChannelRequest {
            channel: FEED_CHANNEL,
            service: FEED_SERVICE.to_string(),
            parameters: ChannelParameters::default(),
        }
    }

    /// Ask for full-object events carrying the fields this client reads.
    #[must_use]
    pub fn feed_setup() -> Self {
        let common = ["eventType", "eventSymbol"];
        let fields = |extra: &[&str]| -> Vec<String> {
            common
                .iter()
                .chain(extra.iter())
                .map(|f| (*f).to_string())
                .collect()
        };

        let mut accept_event_fields = BTreeMap::new();
        accept_event_fields.insert(
            EventKind::Quote.as_str().to_string(),
            fields(&["bidPrice", "askPrice"]),
        );
        accept_event_fields.insert(
            EventKind::Trade.as_str().to_string(),
            fields(&["price", "dayVolume"]),
        );
        accept_event_fields.insert(
            EventKind::Greeks.as_str().to_string(),
            fields(&["gamma", "delta", "volatility"]),
        );
        accept_event_fields.insert(
            EventKind::Summary.as_str().to_string(),
            fields(&["openInterest"]),
        );

        Self::FeedSetup {
            channel: FEED_CHANNEL,
            accept_aggregation_period: 0.1,
            accept_data_format: "FULL".to_string(),
            accept_event_fields,
        }
    }

    /// Subscription-add frame on the feed channel.
    #[must_use]
    pub fn subscribe(add: Vec<SubscriptionEntry>) -> Self {
        Self::FeedSubscription {
            channel: FEED_CHANNEL,
            add,
            remove: Vec::new(),
            reset: None,
        }
    }

    /// Keepalive on the control channel.
    #[must_use]
    pub const fn keepalive() -> Self {
        Self::Keepalive {
            channel: CONTROL_CHANNEL,
        }
    }

    /// Wire name of the frame type, for logs.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "SETUP",
            Self::AuthState { .. } => "AUTH_STATE",
            Self::Auth { .. } => "AUTH",
            Self::ChannelRequest { .. } => "CHANNEL_REQUEST",
            Self::ChannelOpened { .. } => "CHANNEL_OPENED",
            Self::ChannelClosed { .. } => "CHANNEL_CLOSED",
            Self::ChannelCancel { .. } => "CHANNEL_CANCEL",
            Self::FeedSetup { .. } => "FEED_SETUP",
            Self::FeedConfig { .. } => "FEED_CONFIG",
            Self::FeedSubscription { .. } => "FEED_SUBSCRIPTION",
            Self::FeedData { .. } => "FEED_DATA",
            Self::Keepalive { .. } => "KEEPALIVE",
            Self::Error { .. } => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// =============================================================================
// Event Payloads
// =============================================================================

/// One event object inside `FEED_DATA`.
///
/// Only the fields this client reads are kept; others are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// `Quote`, `Trade`, `Greeks`, `Summary`, ...
    #[serde(default)]
    pub event_type: Option<String>,
    /// Symbol the event refers to.
    #[serde(default)]
    pub event_symbol: Option<String>,
    /// Quote bid.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub bid_price: Option<f64>,
    /// Quote ask.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub ask_price: Option<f64>,
    /// Trade price.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Trade cumulative day volume.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub day_volume: Option<f64>,
    /// Greeks gamma.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    /// Greeks delta.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Greeks implied volatility.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    /// Summary open interest.
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
}

impl EventPayload {
    /// Convert to a normalized event.
    ///
    /// Returns `None` for unknown event types or a missing symbol.
    #[must_use]
    pub fn into_event(self) -> Option<FeedEvent> {
        let symbol = self.event_symbol?;
        let event = match self.event_type.as_deref()? {
            "Quote" => FeedEvent::Quote {
                symbol,
                bid_price: self.bid_price,
                ask_price: self.ask_price,
            },
            "Trade" => FeedEvent::Trade {
                symbol,
                price: self.price,
                day_volume: self.day_volume,
            },
            "Greeks" => FeedEvent::Greeks {
                symbol,
                gamma: self.gamma,
                delta: self.delta,
                volatility: self.volatility,
            },
            "Summary" => FeedEvent::Summary {
                symbol,
                open_interest: self.open_interest,
            },
            _ => return None,
        };
        Some(event)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Number(f64),
    Text(String),
    Other(serde::de::IgnoredAny),
}

/// Decode a number, numeric string, `null` or anything else into a finite
/// `Option<f64>`.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<LenientNumber>::deserialize(deserializer)?;
    let number = match value {
        Some(LenientNumber::Number(n)) => Some(n),
        Some(LenientNumber::Text(text)) => text.trim().parse::<f64>().ok(),
        Some(LenientNumber::Other(_)) | None => None,
    };
    Ok(number.filter(|n| n.is_finite()))
}
