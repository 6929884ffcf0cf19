//! Subscription Planning
//!
//! Works out which option contracts to stream and asks the feed for them.
//! The ladder is centred on the underlying's current price, taken from the
//! first two-sided quote the feed delivers after connecting.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tokio::time::Instant;

use crate::application::ports::FeedPort;
use crate::domain::feed::{
    ChannelEvent, EventKind, FeedError, FeedEvent, FeedMessage, SubscriptionEntry,
};
use crate::domain::symbol::{LadderSpec, OptionSymbol, generate_ladder, round_to_increment};

/// Outcome of center price resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterPrice {
    /// Center used for the strike ladder.
    pub price: Decimal,
    /// Raw quote midpoint, or `None` when the fallback was used.
    pub midpoint: Option<f64>,
}

impl CenterPrice {
    /// Whether no quote arrived in time.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.midpoint.is_none()
    }
}

/// Builds ladders and subscription requests for one underlying and expiration.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    underlying: String,
    ladder: LadderSpec,
}

impl SubscriptionManager {
    /// Create a manager for `underlying` using `ladder` for option symbols.
    #[must_use]
    pub fn new(underlying: impl Into<String>, ladder: LadderSpec) -> Self {
        Self {
            underlying: underlying.into(),
            ladder,
        }
    }

    /// Underlying ticker.
    #[must_use]
    pub fn underlying(&self) -> &str {
        &self.underlying
    }

    /// Ladder parameters.
    #[must_use]
    pub const fn ladder(&self) -> &LadderSpec {
        &self.ladder
    }

    /// Entries requesting Quote, Trade, Greeks and Summary for each symbol,
    /// followed by a Quote for the underlying.
    #[must_use]
    pub fn build_add_list(symbols: &[OptionSymbol], underlying: &str) -> Vec<SubscriptionEntry> {
        let mut entries = Vec::with_capacity(symbols.len() * EventKind::OPTION_KINDS.len() + 1);
        for symbol in symbols {
            let text = symbol.to_string();
            entries.extend(
                EventKind::OPTION_KINDS
                    .iter()
                    .map(|kind| SubscriptionEntry::new(text.clone(), *kind)),
            );
        }
        entries.push(SubscriptionEntry::new(underlying, EventKind::Quote));
        entries
    }

    /// Subscribe to the underlying's quotes and wait for a two-sided quote.
    ///
    /// The midpoint is rounded to the nearest strike increment. If no quote
    /// arrives within `timeout`, `fallback` is returned unchanged. Data for
    /// other symbols received while waiting is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be sent or the session
    /// fails while waiting.
    pub async fn resolve_center_price(
        &self,
        session: &mut dyn FeedPort,
        timeout: Duration,
        fallback: Decimal,
    ) -> Result<CenterPrice, FeedError> {
        session
            .subscribe(&[SubscriptionEntry::new(&self.underlying, EventKind::Quote)])
            .await?;

        let deadline = Instant::now() + timeout;
        loop {
            let Ok(message) = tokio::time::timeout_at(deadline, session.receive()).await else {
                tracing::warn!(
                    underlying = %self.underlying,
                    fallback = %fallback,
                    "No underlying quote before timeout, using fallback price"
                );
                return Ok(CenterPrice {
                    price: fallback,
                    midpoint: None,
                });
            };

            match message? {
                FeedMessage::Data(events) => {
                    if let Some(center) = self.center_from(&events) {
                        tracing::info!(
                            underlying = %self.underlying,
                            center = %center.price,
                            "Resolved center price"
                        );
                        return Ok(center);
                    }
                }
                FeedMessage::Channel(ChannelEvent::Closed { .. }) => {
                    return Err(FeedError::ChannelClosed);
                }
                FeedMessage::Channel(event) => {
                    tracing::debug!(?event, "Channel event while resolving center price");
                }
            }
        }
    }

    fn center_from(&self, events: &[FeedEvent]) -> Option<CenterPrice> {
        events
            .iter()
            .filter(|event| event.symbol() == self.underlying)
            .find_map(|event| {
                let midpoint = event.midpoint()?;
                let price = Decimal::from_f64(midpoint)?;
                Some(CenterPrice {
                    price: round_to_increment(price, self.ladder.increment),
                    midpoint: Some(midpoint),
                })
            })
    }

    /// Generate the ladder around `center` and send its subscription request.
    ///
    /// Returns the subscribed option symbols.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn subscribe(
        &self,
        session: &mut dyn FeedPort,
        center: Decimal,
    ) -> Result<Vec<OptionSymbol>, FeedError> {
        let symbols = generate_ladder(center, &self.ladder);
        let entries = Self::build_add_list(&symbols, &self.underlying);
        session.subscribe(&entries).await?;

        tracing::info!(
            underlying = %self.underlying,
            expiration = %self.ladder.expiration,
            options = symbols.len(),
            entries = entries.len(),
            "Subscribed to option ladder"
        );
        Ok(symbols)
    }
}
