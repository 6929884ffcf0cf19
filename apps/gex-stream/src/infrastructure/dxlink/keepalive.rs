//! Keepalive Tracking
//!
//! dxLink peers drop a connection that stays silent past the negotiated
//! keepalive timeout. The session answers every inbound `KEEPALIVE`, sends
//! its own after `interval` without outbound traffic, and gives up when
//! nothing has arrived for `timeout`.
//!
//! The tracker is polled inline by the session's receive loop instead of
//! running as a separate task, so it never outlives the connection.

use std::time::Duration;

use tokio::time::Instant;

/// Keepalive timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Send a keepalive after this long without sending anything.
    pub interval: Duration,
    /// Fail the connection after this long without receiving anything.
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

/// What the session should do when the tracker's deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Nothing is due yet.
    Idle,
    /// Send a keepalive frame.
    Send,
    /// The peer has been silent too long.
    TimedOut,
}

/// Last-activity bookkeeping for one connection.
#[derive(Debug, Clone)]
pub struct KeepaliveTracker {
    config: KeepaliveConfig,
    last_received: Instant,
    last_sent: Instant,
}

impl KeepaliveTracker {
    /// Start tracking from `now`.
    #[must_use]
    pub const fn new(config: KeepaliveConfig, now: Instant) -> Self {
        Self {
            config,
            last_received: now,
            last_sent: now,
        }
    }

    /// Record inbound traffic.
    pub const fn record_received(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Record outbound traffic.
    pub const fn record_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Earliest instant at which [`KeepaliveTracker::check`] may act.
    #[must_use]
    pub fn next_deadline(&self) -> Instant {
        let send_at = self.last_sent + self.config.interval;
        let timeout_at = self.last_received + self.config.timeout;
        send_at.min(timeout_at)
    }

    /// Decide what is due at `now`. A timeout takes precedence.
    #[must_use]
    pub fn check(&self, now: Instant) -> KeepaliveAction {
        if now.saturating_duration_since(self.last_received) >= self.config.timeout {
            KeepaliveAction::TimedOut
        } else if now.saturating_duration_since(self.last_sent) >= self.config.interval {
            KeepaliveAction::Send
        } else {
            KeepaliveAction::Idle
        }
    }
}
