//! dxLink WebSocket Adapter
//!
//! Implements the feed ports over a dxLink endpoint:
//!
//! - **messages**: JSON frame types and lenient event decoding
//! - **codec**: text frame encoding and decoding
//! - **auth**: authorization state machine and static token provider
//! - **keepalive**: inline keepalive bookkeeping
//! - **session**: the handshake, receive loop and connector

pub mod auth;
pub mod codec;
pub mod keepalive;
pub mod messages;
pub mod session;

pub use auth::{AuthAction, AuthHandler, AuthPhase, StaticTokenProvider};
pub use codec::{CodecError, JsonCodec};
pub use keepalive::{KeepaliveAction, KeepaliveConfig, KeepaliveTracker};
pub use messages::{AuthStatus, DxLinkMessage, EventPayload, FEED_CHANNEL};
pub use session::{DxLinkConfig, DxLinkConnector, DxLinkSession};
