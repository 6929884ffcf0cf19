//! Feed error taxonomy.

use thiserror::Error;

/// Errors raised while connecting to or streaming from the feed.
///
/// Everything except [`FeedError::Closed`] is recovered by reconnecting.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Transport could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// An expected frame did not arrive in time.
    #[error("timed out waiting for {stage}")]
    Timeout {
        /// Handshake or streaming stage that timed out.
        stage: &'static str,
    },

    /// Transport-level failure on an established connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server sent an unexpected frame shape or sequence.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The server rejected the token.
    #[error("feed rejected the streamer token")]
    Unauthorized,

    /// The server closed the connection or the data channel.
    #[error("feed channel closed")]
    ChannelClosed,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The session was closed by its owner.
    #[error("session closed")]
    Closed,
}

impl FeedError {
    /// Whether the supervisor should reconnect after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
            Self::ProtocolViolation(_) => "protocol",
            Self::Unauthorized => "unauthorized",
            Self::ChannelClosed => "channel_closed",
            Self::Codec(_) => "codec",
            Self::Closed => "closed",
        }
    }
}
