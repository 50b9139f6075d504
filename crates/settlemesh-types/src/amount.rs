//! Fixed-point amounts over the 6-decimal base unit.
//!
//! An [`Amount`] is an integer count of micro-units (10^-6). It is never a
//! float: arithmetic, comparison and percentages all run on the scaled
//! integer, and human-readable strings exist only at the boundary
//! ([`Amount::parse`] / `Display`).
//!
//! ```text
//! "1000.5"  --parse-->  Amount(1_000_500_000)  --format-->  "1000.5"
//! ```

use std::{cmp::Ordering, fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{AMOUNT_DECIMALS, AMOUNT_SCALE, BASE_CURRENCY_SYMBOL, PERCENT_SCALE},
    Result, SettlemeshError,
};

/// How [`Amount::parse_with`] treats fractional digits beyond 6 places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParseMode {
    /// Drop the excess digits (toward zero).
    #[default]
    Truncate,
    /// Round toward positive infinity when any dropped digit is non-zero.
    RoundUp,
}

/// Immutable fixed-point quantity in micro-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i128);

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Build from a raw micro-unit count (chain data).
    #[must_use]
    pub const fn from_micros(micros: i128) -> Self {
        Self(micros)
    }

    /// Whole units, e.g. `Amount::from_units(1000)` is `1000.0`.
    pub fn from_units(units: i64) -> Self {
        Self(i128::from(units) * AMOUNT_SCALE)
    }

    #[must_use]
    pub const fn micros(self) -> i128 {
        self.0
    }

    /// Parse a decimal string, truncating beyond 6 fractional digits.
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with(input, ParseMode::Truncate)
    }

    pub fn parse_with(input: &str, mode: ParseMode) -> Result<Self> {
        let trimmed = input.trim();
        if !is_decimal_literal(trimmed) {
            return Err(SettlemeshError::invalid_amount(format!(
                "not a decimal number: {input:?}"
            )));
        }

        let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let keep = AMOUNT_DECIMALS as usize;
        let (kept, dropped) = if fraction.len() > keep {
            fraction.split_at(keep)
        } else {
            (fraction, "")
        };

        let negative = whole.starts_with('-');
        let overflow = || SettlemeshError::invalid_amount(format!("{input:?} overflows"));
        let units = digits_value(whole.trim_start_matches('-')).ok_or_else(overflow)?;
        let micros = digits_value(&format!("{kept:0<keep$}")).ok_or_else(overflow)?;
        let magnitude = units
            .checked_mul(AMOUNT_SCALE)
            .and_then(|u| u.checked_add(micros))
            .ok_or_else(overflow)?;
        let mut amount = Self(if negative { -magnitude } else { magnitude });

        let lost_precision = dropped.bytes().any(|b| b != b'0');
        if mode == ParseMode::RoundUp && lost_precision && !negative {
            amount = amount.checked_add(Self(1))?;
        }
        Ok(amount)
    }

    /// Convert from a `Decimal` carrying at most 6 fractional digits.
    /// Extra digits are truncated toward zero.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        let truncated = value.trunc_with_scale(AMOUNT_DECIMALS);
        let scale = truncated.scale();
        let factor = pow10(AMOUNT_DECIMALS - scale)?;
        truncated
            .mantissa()
            .checked_mul(factor)
            .map(Self)
            .ok_or_else(|| SettlemeshError::invalid_amount(format!("{value} overflows")))
    }

    /// Lossless conversion to `Decimal` (fails only beyond 96-bit mantissas).
    pub fn to_decimal(self) -> Result<Decimal> {
        Decimal::try_from_i128_with_scale(self.0, AMOUNT_DECIMALS)
            .map_err(|e| SettlemeshError::invalid_amount(format!("{}: {e}", self.0)))
    }

    // -----------------------------------------------------------------------
    // Arithmetic
    // -----------------------------------------------------------------------

    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or_else(|| SettlemeshError::invalid_amount("addition overflow"))
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or_else(|| SettlemeshError::invalid_amount("subtraction overflow"))
    }

    #[must_use]
    pub fn compare(self, rhs: Self) -> Ordering {
        self.cmp(&rhs)
    }

    #[must_use]
    pub fn min_of(self, rhs: Self) -> Self {
        self.min(rhs)
    }

    #[must_use]
    pub fn max_of(self, rhs: Self) -> Self {
        self.max(rhs)
    }

    /// `percent` of this amount, truncated toward zero at micro-unit
    /// precision. Pure integer math: `micros * ppm / 1_000_000`.
    pub fn percentage_of(self, percent: Percent) -> Result<Self> {
        self.0
            .checked_mul(percent.0)
            .map(|scaled| Self(scaled / PERCENT_SCALE))
            .ok_or_else(|| SettlemeshError::invalid_amount("percentage overflow"))
    }

    /// Coarsen to `decimals` fractional digits (0..=6).
    pub fn round_to(self, decimals: u32, round_up: bool) -> Result<Self> {
        if decimals > AMOUNT_DECIMALS {
            return Err(SettlemeshError::invalid_amount(format!(
                "cannot round to {decimals} decimals, maximum is {AMOUNT_DECIMALS}"
            )));
        }
        let divisor = pow10(AMOUNT_DECIMALS - decimals)?;
        let quotient = self.0 / divisor;
        let bumped = if round_up && self.0 % divisor != 0 {
            quotient + 1
        } else {
            quotient
        };
        bumped
            .checked_mul(divisor)
            .map(Self)
            .ok_or_else(|| SettlemeshError::invalid_amount("rounding overflow"))
    }

    // -----------------------------------------------------------------------
    // Scale conversion
    // -----------------------------------------------------------------------

    /// Interpret `raw` as a fixed-point value with `scale` decimals.
    pub fn from_scaled(raw: i128, scale: u32) -> Result<Self> {
        convert_decimals(raw, scale, AMOUNT_DECIMALS).map(Self)
    }

    /// Express this amount with `scale` decimals (truncating when coarser).
    pub fn to_scaled(self, scale: u32) -> Result<i128> {
        convert_decimals(self.0, AMOUNT_DECIMALS, scale)
    }

    // -----------------------------------------------------------------------
    // Predicates and formatting
    // -----------------------------------------------------------------------

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Canonical form with thousands separators on the whole part.
    #[must_use]
    pub fn format_with_separators(self) -> String {
        let canonical = self.to_string();
        let (sign, unsigned) = canonical
            .strip_prefix('-')
            .map_or(("", canonical.as_str()), |rest| ("-", rest));
        let (whole, fraction) = unsigned.split_once('.').map_or((unsigned, None), |(w, f)| (w, Some(f)));

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, ch) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        match fraction {
            Some(f) => format!("{sign}{grouped}.{f}"),
            None => format!("{sign}{grouped}"),
        }
    }

    /// Canonical form followed by the base currency symbol.
    #[must_use]
    pub fn display_polyx(self) -> String {
        format!("{self} {BASE_CURRENCY_SYMBOL}")
    }
}

/// Canonical decimal form: no trailing fractional zeros, no `.` for integers.
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = AMOUNT_SCALE.unsigned_abs();
        let whole = abs / scale;
        let fraction = abs % scale;
        if fraction == 0 {
            return write!(f, "{sign}{whole}");
        }
        let digits = format!("{fraction:0width$}", width = AMOUNT_DECIMALS as usize);
        write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = SettlemeshError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Amount {
    type Error = SettlemeshError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(a: Amount) -> Self {
        a.to_string()
    }
}

// ---------------------------------------------------------------------------
// Percent
// ---------------------------------------------------------------------------

/// A percentage in fixed point: the ratio times [`PERCENT_SCALE`].
/// `Percent::from_whole(10)` is stored as 100_000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Percent(i128);

impl Percent {
    /// Micro-ratio units per one percent.
    const PER_PERCENT: i128 = PERCENT_SCALE / 100;

    #[must_use]
    pub fn from_whole(percent: u32) -> Self {
        Self(i128::from(percent) * Self::PER_PERCENT)
    }

    /// Raw ratio in millionths.
    #[must_use]
    pub const fn from_ppm(ppm: i128) -> Self {
        Self(ppm)
    }

    /// Parse `"12.5"` as 12.5%. Digits beyond 4 decimals are truncated.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_end_matches('%');
        if !is_decimal_literal(trimmed) {
            return Err(SettlemeshError::invalid_amount(format!(
                "not a percentage: {input:?}"
            )));
        }
        let value = Decimal::from_str(trimmed)
            .map_err(|e| SettlemeshError::invalid_amount(format!("{input:?}: {e}")))?;
        // 1% = 10^4 ppm, so keep 4 fractional digits.
        let truncated = value.trunc_with_scale(4);
        let factor = pow10(4 - truncated.scale())?;
        truncated
            .mantissa()
            .checked_mul(factor)
            .map(Self)
            .ok_or_else(|| SettlemeshError::invalid_amount(format!("{input:?} overflows")))
    }

    #[must_use]
    pub const fn ppm(self) -> i128 {
        self.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse Amount's canonical formatting: ppm / 10^4 has 4 decimals,
        // shifting by 10^2 lines it up with the 6-decimal renderer.
        write!(f, "{}%", Amount(self.0 * 100))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a raw fixed-point integer between decimal scales.
/// Scaling down truncates toward zero; scaling up is overflow-checked.
pub fn convert_decimals(raw: i128, from_scale: u32, to_scale: u32) -> Result<i128> {
    match from_scale.cmp(&to_scale) {
        Ordering::Equal => Ok(raw),
        Ordering::Greater => Ok(raw / pow10(from_scale - to_scale)?),
        Ordering::Less => raw
            .checked_mul(pow10(to_scale - from_scale)?)
            .ok_or_else(|| {
                SettlemeshError::invalid_amount(format!(
                    "{raw} overflows converting {from_scale} -> {to_scale} decimals"
                ))
            }),
    }
}

fn pow10(exp: u32) -> Result<i128> {
    10i128
        .checked_pow(exp)
        .ok_or_else(|| SettlemeshError::invalid_amount(format!("10^{exp} overflows")))
}

/// Value of an ASCII digit string; empty is zero, `None` on overflow.
fn digits_value(digits: &str) -> Option<i128> {
    digits.bytes().try_fold(0i128, |acc, b| {
        acc.checked_mul(10)?.checked_add(i128::from(b - b'0'))
    })
}

/// `-?digits(.digits)?` with at least one digit somewhere.
fn is_decimal_literal(s: &str) -> bool {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    let mut parts = unsigned.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let fraction = parts.next().unwrap_or("");
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    (!whole.is_empty() || !fraction.is_empty()) && all_digits(whole) && all_digits(fraction)
}
