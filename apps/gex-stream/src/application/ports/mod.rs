//! Port Interfaces
//!
//! Contracts between the application services and the outside world,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement these; services depend only on the traits.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TokenProvider`: supplies a currently valid streamer token
//! - `FeedConnector` / `FeedPort`: opens and drives one feed session
//! - `HistoryStore`: persists per-symbol update maps over time

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::exposure::HistoryPayload;
use crate::domain::feed::{ConnectionState, FeedError, FeedMessage, SubscriptionEntry};

// =============================================================================
// Token Provider
// =============================================================================

/// Source of bearer tokens for the feed handshake.
///
/// Refresh and expiry are the provider's concern; sessions ask for a token
/// each time they authenticate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a currently valid token.
    ///
    /// # Errors
    ///
    /// Returns an error if no token can be obtained.
    async fn token(&self) -> Result<String, FeedError>;
}

// =============================================================================
// Feed Session
// =============================================================================

/// One open, authorized feed session with its data channel established.
#[async_trait]
pub trait FeedPort: Send {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Send a subscription-add request on the data channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not streaming or the frame cannot
    /// be sent.
    async fn subscribe(&mut self, entries: &[SubscriptionEntry]) -> Result<(), FeedError>;

    /// Wait for the next substantive message.
    ///
    /// Keepalive requests are answered internally and never returned.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, protocol violation, keepalive
    /// timeout or after [`FeedPort::close`].
    async fn receive(&mut self) -> Result<FeedMessage, FeedError>;

    /// Release the transport. Calling this more than once is harmless.
    async fn close(&mut self);
}

/// Factory for feed sessions.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Connect, authenticate and open the data channel.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, on timeout awaiting any
    /// handshake frame, or if the feed refuses authorization or the channel.
    async fn open(&self, tokens: &dyn TokenProvider) -> Result<Box<dyn FeedPort>, FeedError>;
}

// =============================================================================
// History Store
// =============================================================================

/// Errors raised by history store adapters.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The payload could not be encoded or decoded.
    #[error("history serialization failed: {0}")]
    Serialization(String),

    /// The backing store failed.
    #[error("history backend error: {0}")]
    Backend(String),
}

/// Time-indexed store of per-symbol update maps.
///
/// Payloads are opaque to the store. `key` groups entries, typically by
/// underlying and expiration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Store a payload at a timestamp, replacing any existing entry there.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn save(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
        payload: &HistoryPayload,
    ) -> Result<(), HistoryError>;

    /// All entries for a key in ascending timestamp order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn list(&self, key: &str) -> Result<Vec<(DateTime<Utc>, HistoryPayload)>, HistoryError>;

    /// The payload stored at exactly `timestamp`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HistoryPayload>, HistoryError>;
}
