//! dxLink Authorization
//!
//! Tracks the authorization half of the dxLink handshake and supplies
//! streamer tokens.
//!
//! # Authorization Flow
//!
//! 1. Client sends `SETUP`
//! 2. Server replies with its own `SETUP` and `AUTH_STATE`
//! 3. If the state is `UNAUTHORIZED`, client sends `AUTH {token}`
//! 4. Server sends `AUTH_STATE AUTHORIZED`, or `UNAUTHORIZED` if the token
//!    was rejected
//!
//! Endpoints that need no token answer step 2 with `AUTHORIZED` directly.

use async_trait::async_trait;

use super::messages::AuthStatus;
use crate::application::ports::TokenProvider;
use crate::domain::feed::FeedError;

// =============================================================================
// Token Provider
// =============================================================================

/// Token provider returning a fixed streamer token.
///
/// `Debug` redacts the token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wrap a token.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Unauthorized`] if the token is empty.
    pub fn new(token: impl Into<String>) -> Result<Self, FeedError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(FeedError::Unauthorized);
        }
        Ok(Self { token })
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, FeedError> {
        Ok(self.token.clone())
    }
}

// =============================================================================
// Authorization Handler
// =============================================================================

/// Progress of the authorization exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPhase {
    /// Waiting for the first `AUTH_STATE`.
    #[default]
    AwaitingState,
    /// Token sent, waiting for the verdict.
    TokenSent,
    /// Authorized.
    Authorized,
}

/// What the session should do after an `AUTH_STATE` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Send an `AUTH` frame with a fresh token.
    SendToken,
    /// Authorization is complete.
    Proceed,
}

/// Authorization state machine for one connection.
#[derive(Debug, Default)]
pub struct AuthHandler {
    phase: AuthPhase,
}

impl AuthHandler {
    /// Create a handler awaiting the first `AUTH_STATE`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: AuthPhase::AwaitingState,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> AuthPhase {
        self.phase
    }

    /// Whether the connection is authorized.
    #[must_use]
    pub const fn is_authorized(&self) -> bool {
        matches!(self.phase, AuthPhase::Authorized)
    }

    /// Process an `AUTH_STATE` frame.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Unauthorized`] if the server is still
    /// unauthorized after the token was sent, or revokes authorization.
    pub fn on_auth_state(&mut self, state: AuthStatus) -> Result<AuthAction, FeedError> {
        match (self.phase, state) {
            (AuthPhase::AwaitingState, AuthStatus::Unauthorized) => {
                self.phase = AuthPhase::TokenSent;
                Ok(AuthAction::SendToken)
            }
            (_, AuthStatus::Authorized) => {
                self.phase = AuthPhase::Authorized;
                Ok(AuthAction::Proceed)
            }
            (AuthPhase::TokenSent | AuthPhase::Authorized, AuthStatus::Unauthorized) => {
                self.phase = AuthPhase::AwaitingState;
                Err(FeedError::Unauthorized)
            }
        }
    }
}
