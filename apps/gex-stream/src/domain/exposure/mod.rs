//! Gamma Exposure Aggregation
//!
//! Owns the mutable exposure state for one underlying/expiration: the latest
//! gamma and open interest per option contract, the per-strike call and put
//! exposure derived from them, and a bounded rolling history of total net
//! exposure.
//!
//! # Design
//!
//! Every public operation takes the single state lock once, so readers never
//! observe a strike aggregate that reflects only part of an update. When an
//! option changes, the affected side of its strike is recomputed from every
//! tracked record at that strike rather than adjusted by a delta:
//!
//! ```text
//! side_gex(strike, right) = Σ gamma × open_interest × 100 × spot
//!                           over records at (strike, right) with both fields known
//! ```
//!
//! Changing the spot price does not refresh existing strike aggregates; a
//! strike picks up the new spot the next time one of its options updates.

mod pending;

pub use pending::{HistoryPayload, OptionMarketData, PendingUpdates, ReadyUpdate, StrikeActivity};

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use super::symbol::{OptionRight, OptionSymbol};

// =============================================================================
// Configuration
// =============================================================================

/// Shares controlled by one option contract.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Tunables for the rolling exposure history.
#[derive(Debug, Clone)]
pub struct ExposureConfig {
    /// Maximum number of retained snapshots; the oldest is evicted first.
    pub history_capacity: usize,
    /// Snapshots older than this are pruned.
    pub history_retention: Duration,
    /// Minimum spacing between two appended snapshots.
    pub snapshot_interval: Duration,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            history_capacity: 720,
            history_retention: Duration::from_secs(3600),
            snapshot_interval: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Exposure Types
// =============================================================================

/// Latest known state of one option contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRecord {
    /// Gamma, if known.
    pub gamma: Option<f64>,
    /// Open interest, if known.
    pub open_interest: Option<f64>,
    /// Call or put.
    pub right: OptionRight,
    /// Strike price.
    pub strike: Decimal,
}

impl OptionRecord {
    fn exposure(&self, spot_price: f64) -> Option<f64> {
        match (self.gamma, self.open_interest) {
            (Some(gamma), Some(oi)) => Some(gamma * oi * CONTRACT_MULTIPLIER * spot_price),
            _ => None,
        }
    }
}

/// Call and put exposure at one strike.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StrikeExposure {
    /// Sum of call exposure at the strike.
    pub call_gex: f64,
    /// Sum of put exposure at the strike.
    pub put_gex: f64,
}

impl StrikeExposure {
    /// Calls minus puts.
    #[must_use]
    pub fn net_gex(&self) -> f64 {
        self.call_gex - self.put_gex
    }
}

/// One row of the exposure-by-strike table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrikeRow {
    /// Strike price.
    pub strike: Decimal,
    /// Call exposure.
    pub call_gex: f64,
    /// Put exposure.
    pub put_gex: f64,
    /// Calls minus puts.
    pub net_gex: f64,
}

/// Portfolio-level exposure summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryMetrics {
    /// Sum of call exposure across strikes.
    pub total_call_gex: f64,
    /// Sum of put exposure across strikes.
    pub total_put_gex: f64,
    /// `total_call_gex - total_put_gex`.
    pub net_gex: f64,
    /// Strike with the largest absolute net exposure (first seen wins ties).
    pub max_abs_net_gex_strike: Option<Decimal>,
    /// Signed net exposure at `max_abs_net_gex_strike`.
    pub max_abs_net_gex_value: f64,
    /// Interpolated strike where net exposure changes sign.
    pub zero_gamma_level: Option<f64>,
    /// Number of option contracts tracked.
    pub tracked_option_count: usize,
}

impl fmt::Display for SummaryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GEX Summary:")?;
        writeln!(f, "  Total Call GEX: ${:.0}", self.total_call_gex)?;
        writeln!(f, "  Total Put GEX: ${:.0}", self.total_put_gex)?;
        writeln!(f, "  Net GEX: ${:.0}", self.net_gex)?;
        match self.max_abs_net_gex_strike {
            Some(strike) => writeln!(
                f,
                "  Max GEX Strike: {strike} (${:.0})",
                self.max_abs_net_gex_value
            )?,
            None => writeln!(f, "  Max GEX Strike: n/a")?,
        }
        match self.zero_gamma_level {
            Some(level) => writeln!(f, "  Zero Gamma: {level:.2}")?,
            None => writeln!(f, "  Zero Gamma: n/a")?,
        }
        write!(f, "  Options Tracked: {}", self.tracked_option_count)
    }
}

/// One point of the rolling net exposure history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSeriesSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Total net exposure at that time.
    pub total_net_gex: f64,
}

/// Consistent view of the whole aggregator taken under one lock.
#[derive(Debug, Clone, Serialize)]
pub struct ExposureView {
    /// Spot price used for new computations.
    pub spot_price: f64,
    /// Summary metrics.
    pub summary: SummaryMetrics,
    /// Exposure by strike, ascending.
    pub strikes: Vec<StrikeRow>,
    /// Net exposure history, ascending.
    pub time_series: Vec<TimeSeriesSnapshot>,
}

// =============================================================================
// Aggregator State
// =============================================================================

#[derive(Debug)]
struct ExposureState {
    spot_price: f64,
    options: HashMap<String, OptionRecord>,
    by_strike: HashMap<Decimal, StrikeExposure>,
    /// Strikes in first-seen order.
    strike_order: Vec<Decimal>,
    time_series: VecDeque<TimeSeriesSnapshot>,
    last_snapshot_at: Option<DateTime<Utc>>,
}

impl ExposureState {
    fn apply(&mut self, symbol: &str, gamma: Option<f64>, open_interest: Option<f64>) -> bool {
        let Some(parsed) = OptionSymbol::parse(symbol) else {
            return false;
        };

        let record = OptionRecord {
            gamma: gamma.filter(|v| v.is_finite()),
            open_interest: open_interest.filter(|v| v.is_finite()),
            right: parsed.right(),
            strike: parsed.strike(),
        };
        self.options.insert(symbol.to_string(), record);
        self.recompute_side(record.strike, record.right);
        true
    }

    fn recompute_side(&mut self, strike: Decimal, right: OptionRight) {
        let spot = self.spot_price;
        let total: f64 = self
            .options
            .values()
            .filter(|r| r.strike == strike && r.right == right)
            .filter_map(|r| r.exposure(spot))
            .sum();

        if !self.by_strike.contains_key(&strike) {
            self.strike_order.push(strike);
        }
        let entry = self.by_strike.entry(strike).or_default();
        match right {
            OptionRight::Call => entry.call_gex = total,
            OptionRight::Put => entry.put_gex = total,
        }
    }

    fn sorted_rows(&self) -> Vec<StrikeRow> {
        let mut rows: Vec<StrikeRow> = self
            .by_strike
            .iter()
            .map(|(strike, gex)| StrikeRow {
                strike: *strike,
                call_gex: gex.call_gex,
                put_gex: gex.put_gex,
                net_gex: gex.net_gex(),
            })
            .collect();
        rows.sort_by(|a, b| a.strike.cmp(&b.strike));
        rows
    }

    fn summary(&self) -> SummaryMetrics {
        let mut total_call = 0.0;
        let mut total_put = 0.0;
        let mut max: Option<(Decimal, f64)> = None;

        for strike in &self.strike_order {
            let Some(gex) = self.by_strike.get(strike) else {
                continue;
            };
            total_call += gex.call_gex;
            total_put += gex.put_gex;

            let net = gex.net_gex();
            match max {
                Some((_, best)) if net.abs() <= best.abs() => {}
                _ => max = Some((*strike, net)),
            }
        }

        SummaryMetrics {
            total_call_gex: total_call,
            total_put_gex: total_put,
            net_gex: total_call - total_put,
            max_abs_net_gex_strike: max.map(|(strike, _)| strike),
            max_abs_net_gex_value: max.map_or(0.0, |(_, value)| value),
            zero_gamma_level: zero_gamma_level(&self.sorted_rows()),
            tracked_option_count: self.options.len(),
        }
    }
}

/// Find the first strike, scanning upward, where net exposure changes sign.
///
/// Adjacent strikes whose net values have a strictly negative product are
/// linearly interpolated. A net value of exactly zero at a strike is not a
/// crossing on its own. Rows must be sorted by ascending strike.
#[must_use]
pub fn zero_gamma_level(rows: &[StrikeRow]) -> Option<f64> {
    rows.windows(2).find_map(|pair| {
        let (lo, hi) = (&pair[0], &pair[1]);
        if lo.net_gex * hi.net_gex >= 0.0 {
            return None;
        }
        let s1 = lo.strike.to_f64()?;
        let s2 = hi.strike.to_f64()?;
        Some(s1 + (s2 - s1) * (-lo.net_gex) / (hi.net_gex - lo.net_gex))
    })
}

// =============================================================================
// Exposure Aggregator
// =============================================================================

/// Thread-safe gamma exposure aggregator.
///
/// # Example
///
/// ```rust
/// use gex_stream::domain::exposure::{ExposureAggregator, ExposureConfig};
///
/// let aggregator = ExposureAggregator::new(6000.0, ExposureConfig::default());
/// aggregator.update_option(".SPXW251214C6000", Some(0.05), Some(1000.0));
/// aggregator.update_option(".SPXW251214P6000", Some(0.04), Some(1500.0));
///
/// let summary = aggregator.summary_metrics();
/// assert_eq!(summary.tracked_option_count, 2);
/// assert!(summary.net_gex < 0.0);
///
/// // Malformed symbols are ignored.
/// aggregator.update_option("NOTASYMBOL", Some(1.0), Some(1.0));
/// assert_eq!(aggregator.summary_metrics().tracked_option_count, 2);
/// ```
#[derive(Debug)]
pub struct ExposureAggregator {
    config: ExposureConfig,
    state: Mutex<ExposureState>,
}

impl ExposureAggregator {
    /// Create an aggregator with an initial spot price.
    #[must_use]
    pub fn new(spot_price: f64, config: ExposureConfig) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            state: Mutex::new(ExposureState {
                spot_price,
                options: HashMap::new(),
                by_strike: HashMap::new(),
                strike_order: Vec::new(),
                time_series: VecDeque::with_capacity(capacity),
                last_snapshot_at: None,
            }),
        }
    }

    /// Replace the spot price used by subsequent recomputations.
    ///
    /// Existing strike aggregates keep the spot they were computed with.
    pub fn set_spot_price(&self, price: f64) {
        self.state.lock().spot_price = price;
    }

    /// Current spot price.
    #[must_use]
    pub fn spot_price(&self) -> f64 {
        self.state.lock().spot_price
    }

    /// Upsert one option's gamma and open interest and recompute its strike side.
    ///
    /// Unparseable symbols are ignored and leave the state untouched. Absent
    /// or non-finite values are stored as unknown and excluded from sums.
    /// Returns whether the update was applied.
    pub fn update_option(
        &self,
        symbol: &str,
        gamma: Option<f64>,
        open_interest: Option<f64>,
    ) -> bool {
        self.state.lock().apply(symbol, gamma, open_interest)
    }

    /// Apply every record in a stored payload that carries gamma and open interest.
    ///
    /// Returns the number of records applied.
    pub fn replay(&self, payload: &HistoryPayload) -> usize {
        let mut state = self.state.lock();
        payload
            .iter()
            .filter(|(_, data)| data.gamma.is_some() && data.open_interest.is_some())
            .filter(|(symbol, data)| state.apply(symbol, data.gamma, data.open_interest))
            .count()
    }

    /// Exposure by strike in ascending strike order.
    #[must_use]
    pub fn exposure_by_strike(&self) -> Vec<StrikeRow> {
        self.state.lock().sorted_rows()
    }

    /// Portfolio-level summary metrics.
    #[must_use]
    pub fn summary_metrics(&self) -> SummaryMetrics {
        self.state.lock().summary()
    }

    /// Interpolated zero-gamma strike, if net exposure changes sign.
    #[must_use]
    pub fn zero_gamma_level(&self) -> Option<f64> {
        zero_gamma_level(&self.state.lock().sorted_rows())
    }

    /// Append a net exposure snapshot stamped with the current time.
    ///
    /// See [`ExposureAggregator::take_snapshot_at`].
    pub fn take_time_series_snapshot(&self) -> bool {
        self.take_snapshot_at(Utc::now())
    }

    /// Append a net exposure snapshot stamped `now`.
    ///
    /// Does nothing and returns `false` if the previous snapshot is less than
    /// the configured interval old. Otherwise appends, evicts beyond capacity
    /// and prunes entries older than the retention window.
    pub fn take_snapshot_at(&self, now: DateTime<Utc>) -> bool {
        let interval = chrono::Duration::from_std(self.config.snapshot_interval)
            .unwrap_or(chrono::TimeDelta::MAX);
        let retention = chrono::Duration::from_std(self.config.history_retention)
            .unwrap_or(chrono::TimeDelta::MAX);

        let mut state = self.state.lock();
        if let Some(last) = state.last_snapshot_at
            && now.signed_duration_since(last) < interval
        {
            return false;
        }

        let total_net_gex = state.summary().net_gex;
        state.time_series.push_back(TimeSeriesSnapshot {
            timestamp: now,
            total_net_gex,
        });
        state.last_snapshot_at = Some(now);

        while state.time_series.len() > self.config.history_capacity {
            state.time_series.pop_front();
        }
        if let Some(cutoff) = now.checked_sub_signed(retention) {
            while state
                .time_series
                .front()
                .is_some_and(|snap| snap.timestamp < cutoff)
            {
                state.time_series.pop_front();
            }
        }
        true
    }

    /// Net exposure history in ascending timestamp order.
    #[must_use]
    pub fn time_series(&self) -> Vec<TimeSeriesSnapshot> {
        self.state.lock().time_series.iter().copied().collect()
    }

    /// Latest record for one option symbol.
    #[must_use]
    pub fn option(&self, symbol: &str) -> Option<OptionRecord> {
        self.state.lock().options.get(symbol).copied()
    }

    /// Summary, strike table and history taken under one lock.
    #[must_use]
    pub fn view(&self) -> ExposureView {
        let state = self.state.lock();
        ExposureView {
            spot_price: state.spot_price,
            summary: state.summary(),
            strikes: state.sorted_rows(),
            time_series: state.time_series.iter().copied().collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
