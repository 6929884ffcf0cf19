//! Option Symbol Codec
//!
//! Parses and generates the feed's canonical option symbol encoding:
//!
//! ```text
//! .<PREFIX><YYMMDD><C|P><STRIKE>
//! .SPXW251214C6000
//! ```
//!
//! # Design
//!
//! Parsing is strict. Anything that does not match the exact shape is
//! reported as `None` and callers skip the input silently; there is no
//! case or whitespace normalization. Strike ladders are generated around
//! a center price so that every generated symbol, whole or fractional,
//! parses back to the same prefix, expiration, right and strike.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Number of digits in the `YYMMDD` expiration field.
pub const EXPIRATION_LEN: usize = 6;

// =============================================================================
// Option Right
// =============================================================================

/// Option right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    /// Call option.
    Call,
    /// Put option.
    Put,
}

impl OptionRight {
    /// Parse the single-character right code used in feed symbols.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            b'C' => Some(Self::Call),
            b'P' => Some(Self::Put),
            _ => None,
        }
    }

    /// Single-character right code used in feed symbols.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

// =============================================================================
// Option Symbol
// =============================================================================

/// A parsed option contract identifier.
///
/// Strikes are held as [`Decimal`] so that ladders built from fractional
/// increments keep their exact value. Symbols produced by [`OptionSymbol::parse`]
/// always carry a normalized, non-negative strike.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionSymbol {
    prefix: String,
    expiration: String,
    right: OptionRight,
    strike: Decimal,
}

impl OptionSymbol {
    /// Parse a feed symbol such as `.SPXW251214C6000`.
    ///
    /// Returns `None` for anything that is not exactly
    /// `.` + uppercase letters + 6 digits + `C`/`P` + strike, where the
    /// strike is digits with an optional `.digits` fraction.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix('.')?;
        let bytes = rest.as_bytes();

        let prefix_len = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
        if prefix_len == 0 {
            return None;
        }

        let expiration_end = prefix_len + EXPIRATION_LEN;
        let expiration = bytes.get(prefix_len..expiration_end)?;
        if !expiration.iter().all(u8::is_ascii_digit) {
            return None;
        }

        let right = OptionRight::from_code(*bytes.get(expiration_end)?)?;

        let strike = parse_strike(rest.get(expiration_end + 1..)?)?;

        Some(Self {
            prefix: rest[..prefix_len].to_string(),
            expiration: rest[prefix_len..expiration_end].to_string(),
            right,
            strike,
        })
    }

    /// Build a symbol from its parts without validation.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        expiration: impl Into<String>,
        right: OptionRight,
        strike: Decimal,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            expiration: expiration.into(),
            right,
            strike,
        }
    }

    /// Option root prefix (e.g. `SPXW`).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Expiration in `YYMMDD` form.
    #[must_use]
    pub fn expiration(&self) -> &str {
        &self.expiration
    }

    /// Call or put.
    #[must_use]
    pub const fn right(&self) -> OptionRight {
        self.right
    }

    /// Strike price.
    #[must_use]
    pub const fn strike(&self) -> Decimal {
        self.strike
    }
}

impl fmt::Display for OptionSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ".{}{}{}{}",
            self.prefix,
            self.expiration,
            self.right.code(),
            format_strike(self.strike)
        )
    }
}

/// Parse `<digits>` or `<digits>.<digits>` into a normalized strike.
fn parse_strike(text: &str) -> Option<Decimal> {
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    let valid = match text.split_once('.') {
        Some((whole, fraction)) => digits(whole) && digits(fraction),
        None => digits(text),
    };
    if !valid {
        return None;
    }
    Decimal::from_str_exact(text).ok().map(|strike| strike.normalize())
}

/// Render a strike the way the feed identifies it.
///
/// Whole strikes have no fractional suffix (`6000`), fractional strikes keep
/// only their significant decimals (`612.5`).
#[must_use]
pub fn format_strike(strike: Decimal) -> String {
    strike.normalize().to_string()
}

// =============================================================================
// Strike Ladder
// =============================================================================

/// Parameters for a strike ladder around a center price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderSpec {
    /// Option root prefix (e.g. `SPXW`).
    pub prefix: String,
    /// Expiration in `YYMMDD` form.
    pub expiration: String,
    /// Number of strikes above the center strike.
    pub strikes_up: u32,
    /// Number of strikes below the center strike.
    pub strikes_down: u32,
    /// Distance between adjacent strikes.
    pub increment: Decimal,
}

/// Round a price to the nearest multiple of `increment`.
///
/// Exact midpoints round half-to-even. Returns the price unchanged when the
/// increment is not positive.
#[must_use]
pub fn round_to_increment(price: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return price;
    }
    (price / increment).round() * increment
}

/// Generate call/put symbols around `center_price`.
///
/// The center strike is `center_price` rounded to the nearest increment.
/// Strikes run from `strikes_down` below to `strikes_up` above inclusive, in
/// ascending order, with the call preceding the put at each strike. Strikes
/// that would fall below zero are skipped. A non-positive increment yields
/// an empty ladder.
#[must_use]
pub fn generate_ladder(center_price: Decimal, layout: &LadderSpec) -> Vec<OptionSymbol> {
    if layout.increment <= Decimal::ZERO {
        return Vec::new();
    }

    let center_strike = round_to_increment(center_price, layout.increment);
    let down = i64::from(layout.strikes_down);
    let up = i64::from(layout.strikes_up);

    let capacity = usize::try_from(up + down + 1)
        .ok()
        .and_then(|strikes| strikes.checked_mul(2))
        .unwrap_or(0);
    let mut symbols = Vec::with_capacity(capacity);
    for step in -down..=up {
        let strike = (center_strike + Decimal::from(step) * layout.increment).normalize();
        if strike.is_sign_negative() && !strike.is_zero() {
            continue;
        }
        for right in [OptionRight::Call, OptionRight::Put] {
            symbols.push(OptionSymbol::new(
                layout.prefix.clone(),
                layout.expiration.clone(),
                right,
                strike,
            ));
        }
    }
    symbols
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn spxw_ladder(up: u32, down: u32, increment: i64) -> LadderSpec {
        LadderSpec {
            prefix: "SPXW".to_string(),
            expiration: "251214".to_string(),
            strikes_up: up,
            strikes_down: down,
            increment: Decimal::from(increment),
        }
    }

    #[test]
    fn parse_spx_weekly_call() {
        let sym = OptionSymbol::parse(".SPXW251214C6000").unwrap();
        assert_eq!(sym.prefix(), "SPXW");
        assert_eq!(sym.expiration(), "251214");
        assert_eq!(sym.right(), OptionRight::Call);
        assert_eq!(sym.strike(), Decimal::from(6000));
    }

    #[test]
    fn parse_ndx_put() {
        let sym = OptionSymbol::parse(".NDXP251214P20000").unwrap();
        assert_eq!(sym.prefix(), "NDXP");
        assert_eq!(sym.right(), OptionRight::Put);
        assert_eq!(sym.strike(), Decimal::from(20000));
    }

    #[test_case("NOTASYMBOL" ; "no leading dot")]
    #[test_case("" ; "empty")]
    #[test_case("." ; "dot only")]
    #[test_case(".251214C6000" ; "missing prefix")]
    #[test_case(".spxw251214C6000" ; "lowercase prefix")]
    #[test_case(".SPXW25121C6000" ; "short expiration")]
    #[test_case(".SPXW251214X6000" ; "bad right")]
    #[test_case(".SPXW251214C" ; "missing strike")]
    #[test_case(".SPXW251214C6000." ; "trailing strike dot")]
    #[test_case(".SPXW251214C.5" ; "missing whole strike")]
    #[test_case(".SPXW251214C60.0.5" ; "two strike dots")]
    #[test_case(".SPXW251214C6000e2" ; "exponent strike")]
    #[test_case(" .SPXW251214C6000" ; "leading whitespace")]
    #[test_case(".SPXW251214C6000 " ; "trailing whitespace")]
    #[test_case(".SPXW251214c6000" ; "lowercase right")]
    fn parse_rejects_malformed(text: &str) {
        assert!(OptionSymbol::parse(text).is_none());
    }

    #[test_case(".SPY251214C102.5", Decimal::new(1025, 1) ; "half strike")]
    #[test_case(".SPY251214P97.50", Decimal::new(975, 1) ; "trailing zero")]
    #[test_case(".SPY251214C100.0", Decimal::from(100) ; "zero fraction")]
    fn parse_fractional_strike(text: &str, strike: Decimal) {
        let sym = OptionSymbol::parse(text).unwrap();
        assert_eq!(sym.strike(), strike);
        assert_eq!(format_strike(sym.strike()), format_strike(strike));
    }

    #[test]
    fn display_matches_feed_encoding() {
        let sym = OptionSymbol::new("SPXW", "251214", OptionRight::Put, Decimal::from(5995));
        assert_eq!(sym.to_string(), ".SPXW251214P5995");
    }

    #[test]
    fn format_strike_whole_and_fractional() {
        assert_eq!(format_strike(Decimal::new(600_000, 2)), "6000");
        assert_eq!(format_strike(Decimal::new(6125, 1)), "612.5");
        assert_eq!(format_strike(Decimal::new(2550, 3)), "2.55");
    }

    #[test]
    fn ladder_orders_strikes_ascending_call_before_put() {
        let ladder = generate_ladder(Decimal::from(6002), &spxw_ladder(1, 1, 5));
        let rendered: Vec<String> = ladder.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                ".SPXW251214C5995",
                ".SPXW251214P5995",
                ".SPXW251214C6000",
                ".SPXW251214P6000",
                ".SPXW251214C6005",
                ".SPXW251214P6005",
            ]
        );
    }

    #[test]
    fn ladder_asymmetric_range() {
        let ladder = generate_ladder(Decimal::from(100), &spxw_ladder(2, 0, 1));
        let strikes: Vec<Decimal> = ladder.iter().map(OptionSymbol::strike).collect();
        assert_eq!(
            strikes,
            vec![
                Decimal::from(100),
                Decimal::from(100),
                Decimal::from(101),
                Decimal::from(101),
                Decimal::from(102),
                Decimal::from(102),
            ]
        );
    }

    #[test]
    fn ladder_fractional_increment_renders_decimals() {
        let layout = LadderSpec {
            increment: Decimal::new(25, 1),
            ..spxw_ladder(1, 0, 1)
        };
        let ladder = generate_ladder(Decimal::from(100), &layout);
        assert_eq!(ladder[2].to_string(), ".SPXW251214C102.5");
        for sym in &ladder {
            assert_eq!(OptionSymbol::parse(&sym.to_string()).as_ref(), Some(sym));
        }
    }

    #[test]
    fn ladder_skips_negative_strikes() {
        let ladder = generate_ladder(Decimal::from(5), &spxw_ladder(0, 3, 5));
        let strikes: Vec<Decimal> = ladder.iter().map(OptionSymbol::strike).collect();
        assert_eq!(
            strikes,
            vec![Decimal::ZERO, Decimal::ZERO, Decimal::from(5), Decimal::from(5)]
        );
    }

    #[test]
    fn ladder_zero_increment_is_empty() {
        let ladder = generate_ladder(Decimal::from(6000), &spxw_ladder(5, 5, 0));
        assert!(ladder.is_empty());
    }

    #[test]
    fn round_to_increment_half_to_even() {
        assert_eq!(
            round_to_increment(Decimal::new(60025, 1), Decimal::from(5)),
            Decimal::from(6000)
        );
        assert_eq!(
            round_to_increment(Decimal::new(60075, 1), Decimal::from(5)),
            Decimal::from(6010)
        );
        assert_eq!(
            round_to_increment(Decimal::new(60031, 1), Decimal::from(5)),
            Decimal::from(6005)
        );
    }

    proptest! {
        #[test]
        fn ladder_round_trips_through_parse(
            prefix in "[A-Z]{1,5}",
            expiration in "[0-9]{6}",
            center in 0u32..50_000,
            up in 0u32..30,
            down in 0u32..30,
            increment in prop::sample::select(vec![
                Decimal::ONE,
                Decimal::from(5),
                Decimal::from(25),
                Decimal::new(5, 1),
                Decimal::new(25, 1),
                Decimal::new(125, 2),
            ]),
        ) {
            let layout = LadderSpec {
                prefix: prefix.clone(),
                expiration: expiration.clone(),
                strikes_up: up,
                strikes_down: down,
                increment,
            };
            for sym in generate_ladder(Decimal::new(i64::from(center), 1), &layout) {
                let parsed = OptionSymbol::parse(&sym.to_string());
                prop_assert_eq!(parsed, Some(sym));
            }
        }
    }
}
