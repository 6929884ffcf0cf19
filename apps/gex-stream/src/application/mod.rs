//! Application Layer - Use cases and port definitions.
//!
//! Services here drive feed sessions through the port traits and feed the
//! domain aggregator; they never touch sockets or wire formats directly.

/// Port interfaces for the feed, token source and history store.
pub mod ports;

/// Subscription planning, reconnect policy, stream supervision and history recording.
pub mod services;
