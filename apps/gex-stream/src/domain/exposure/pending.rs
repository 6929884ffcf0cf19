//! Per-symbol merge of partial feed events.
//!
//! Greeks, Summary and Trade events for one contract arrive independently.
//! [`PendingUpdates`] keeps the latest known value of each field and reports
//! when a contract has both gamma and open interest so the aggregator can be
//! refreshed.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::feed::FeedEvent;
use crate::domain::symbol::{OptionRight, OptionSymbol};

/// Latest known market data for one contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionMarketData {
    /// Gamma from the last Greeks event that carried one.
    pub gamma: Option<f64>,
    /// Delta from the last Greeks event that carried one.
    pub delta: Option<f64>,
    /// Implied volatility.
    #[serde(rename = "iv")]
    pub implied_volatility: Option<f64>,
    /// Open interest from the last Summary event that carried one.
    #[serde(rename = "oi")]
    pub open_interest: Option<f64>,
    /// Cumulative day volume from the last Trade event that carried one.
    pub volume: Option<f64>,
}

/// Stored snapshot of every tracked contract, keyed by option symbol.
pub type HistoryPayload = BTreeMap<String, OptionMarketData>;

/// A contract whose gamma and open interest are both known.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyUpdate {
    /// Option symbol.
    pub symbol: String,
    /// Gamma.
    pub gamma: f64,
    /// Open interest.
    pub open_interest: f64,
}

/// Open interest, volume and volatility for both sides of one strike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrikeActivity {
    /// Strike price.
    pub strike: Decimal,
    /// Call open interest.
    pub call_open_interest: f64,
    /// Put open interest.
    pub put_open_interest: f64,
    /// Call day volume.
    pub call_volume: f64,
    /// Put day volume.
    pub put_volume: f64,
    /// Call implied volatility.
    pub call_iv: Option<f64>,
    /// Put implied volatility.
    pub put_iv: Option<f64>,
}

impl StrikeActivity {
    /// Put/call open interest ratio, if there is call interest.
    #[must_use]
    pub fn put_call_oi_ratio(&self) -> Option<f64> {
        (self.call_open_interest > 0.0).then(|| self.put_open_interest / self.call_open_interest)
    }
}

fn known(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Merge buffer for partial per-contract events.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    entries: HashMap<String, OptionMarketData>,
}

impl PendingUpdates {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event.
    ///
    /// Absent values never erase a previously known one. Returns a
    /// [`ReadyUpdate`] when a Greeks or Summary event leaves the contract with
    /// both gamma and open interest known. Quotes are not buffered.
    pub fn apply(&mut self, event: &FeedEvent) -> Option<ReadyUpdate> {
        let triggers = match event {
            FeedEvent::Quote { .. } => return None,
            FeedEvent::Trade { day_volume, .. } => {
                let volume = known(*day_volume);
                let entry = self.entry(event.symbol());
                if volume.is_some() {
                    entry.volume = volume;
                }
                false
            }
            FeedEvent::Greeks {
                gamma,
                delta,
                volatility,
                ..
            } => {
                let entry = self.entry(event.symbol());
                if let Some(g) = known(*gamma) {
                    entry.gamma = Some(g);
                }
                if let Some(d) = known(*delta) {
                    entry.delta = Some(d);
                }
                if let Some(iv) = known(*volatility) {
                    entry.implied_volatility = Some(iv);
                }
                true
            }
            FeedEvent::Summary { open_interest, .. } => {
                let entry = self.entry(event.symbol());
                if let Some(oi) = known(*open_interest) {
                    entry.open_interest = Some(oi);
                }
                true
            }
        };

        if !triggers {
            return None;
        }
        let data = self.entries.get(event.symbol())?;
        match (data.gamma, data.open_interest) {
            (Some(gamma), Some(open_interest)) => Some(ReadyUpdate {
                symbol: event.symbol().to_string(),
                gamma,
                open_interest,
            }),
            _ => None,
        }
    }

    fn entry(&mut self, symbol: &str) -> &mut OptionMarketData {
        self.entries.entry(symbol.to_string()).or_default()
    }

    /// Fill in symbols from a stored payload that have not been seen live.
    ///
    /// Returns the number of symbols added.
    pub fn seed(&mut self, payload: &HistoryPayload) -> usize {
        let mut added = 0;
        for (symbol, data) in payload {
            if !self.entries.contains_key(symbol) {
                self.entries.insert(symbol.clone(), *data);
                added += 1;
            }
        }
        added
    }

    /// Latest known data for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&OptionMarketData> {
        self.entries.get(symbol)
    }

    /// Number of buffered symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the buffer in stable symbol order.
    #[must_use]
    pub fn to_payload(&self) -> HistoryPayload {
        self.entries
            .iter()
            .map(|(symbol, data)| (symbol.clone(), *data))
            .collect()
    }

    /// Per-strike open interest, volume and volatility, ascending by strike.
    ///
    /// Symbols that do not parse as option symbols are skipped.
    #[must_use]
    pub fn activity_by_strike(&self) -> Vec<StrikeActivity> {
        let mut by_strike: BTreeMap<Decimal, StrikeActivity> = BTreeMap::new();

        for (symbol, data) in &self.entries {
            let Some(parsed) = OptionSymbol::parse(symbol) else {
                continue;
            };
            let row = by_strike
                .entry(parsed.strike())
                .or_insert_with(|| StrikeActivity {
                    strike: parsed.strike(),
                    ..StrikeActivity::default()
                });
            let oi = data.open_interest.unwrap_or(0.0);
            let volume = data.volume.unwrap_or(0.0);
            match parsed.right() {
                OptionRight::Call => {
                    row.call_open_interest += oi;
                    row.call_volume += volume;
                    row.call_iv = data.implied_volatility.or(row.call_iv);
                }
                OptionRight::Put => {
                    row.put_open_interest += oi;
                    row.put_volume += volume;
                    row.put_iv = data.implied_volatility.or(row.put_iv);
                }
            }
        }

        by_strike.into_values().collect()
    }
}
