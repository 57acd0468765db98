//! Exact conversion between integer base units and decimal strings.
//!
//! Used only at the CEX boundary: the venue speaks human-readable decimal
//! amounts, everything else in the system is integer base units. The
//! conversion is pure string manipulation, no floating point anywhere.

use crate::token::Amount;
use anyhow::{bail, Result};

/// Render `amount` base units as a decimal string with `decimals` places.
///
/// Negative `decimals` scales up instead: `to_decimal(123, -2) == "12300"`.
pub fn to_decimal(amount: Amount, decimals: i32) -> String {
    if decimals <= 0 {
        let mut s = amount.to_string();
        s.push_str(&"0".repeat(decimals.unsigned_abs() as usize));
        return s;
    }

    let d = decimals as usize;
    let mut digits = amount.to_string();
    if digits.len() < d + 1 {
        digits = format!("{}{}", "0".repeat(d + 1 - digits.len()), digits);
    }
    let split = digits.len() - d;
    format!("{}.{}", &digits[..split], &digits[split..])
}

/// Parse a decimal string into base units with `decimals` places.
///
/// Excess fractional digits are truncated, missing ones are zero-filled.
/// Negative `decimals` trims whole-unit digits instead.
pub fn from_decimal(s: &str, decimals: i32) -> Result<Amount> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        bail!("empty decimal string");
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        bail!("invalid decimal string {:?}", s);
    }

    if decimals < 0 {
        let trim = decimals.unsigned_abs() as usize;
        if whole.len() <= trim {
            return Ok(0);
        }
        let kept = &whole[..whole.len() - trim];
        return parse_digits(kept);
    }

    let d = decimals as usize;
    let mut frac = frac.to_string();
    frac.truncate(d);
    while frac.len() < d {
        frac.push('0');
    }
    parse_digits(&format!("{}{}", whole, frac))
}

fn parse_digits(digits: &str) -> Result<Amount> {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    Ok(trimmed.parse::<Amount>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satoshi_boundaries() {
        assert_eq!(to_decimal(1, 8), "0.00000001");
        assert_eq!(to_decimal(100_000_000, 8), "1.00000000");
        assert_eq!(from_decimal("0.00000001", 8).unwrap(), 1);
        assert_eq!(from_decimal("1", 8).unwrap(), 100_000_000);
    }

    #[test]
    fn test_round_trip_base_units() {
        for d in [0i32, 6, 8, 9, 18] {
            for x in [0u128, 1, 7, 999_999, 100_000_000, 1_234_567_890_123_456_789] {
                assert_eq!(from_decimal(&to_decimal(x, d), d).unwrap(), x, "x={} d={}", x, d);
            }
        }
    }

    #[test]
    fn test_excess_fractional_digits_truncate() {
        assert_eq!(from_decimal("1.123456789", 8).unwrap(), 112_345_678);
        assert_eq!(from_decimal("0.9999999999", 8).unwrap(), 99_999_999);
    }

    #[test]
    fn test_missing_fractional_digits_zero_fill() {
        assert_eq!(from_decimal("20", 6).unwrap(), 20_000_000);
        assert_eq!(from_decimal("0.5", 6).unwrap(), 500_000);
    }

    #[test]
    fn test_negative_decimals() {
        assert_eq!(to_decimal(123, -2), "12300");
        assert_eq!(from_decimal("12345", -2).unwrap(), 123);
        assert_eq!(from_decimal("99", -3).unwrap(), 0);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(from_decimal("", 8).is_err());
        assert!(from_decimal("12a", 8).is_err());
        assert!(from_decimal("-5", 8).is_err());
    }
}
