//! Conversions between human-readable token amounts and base units.
//!
//! All arithmetic goes through `rust_decimal` so that `floor(amount * 10^decimals)`
//! is exact for any amount a user can type.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("invalid amount: {0}")]
    Invalid(String),
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount does not fit in base units")]
    Overflow,
}

/// Accepts what an amount field accepts while typing: digits with at most one dot.
pub fn is_valid_amount_input(input: &str) -> bool {
    input.chars().all(|c| c.is_ascii_digit() || c == '.') && input.matches('.').count() <= 1
}

pub fn parse_positive(input: &str) -> Result<Decimal, AmountError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }
    if !is_valid_amount_input(s) || s == "." {
        return Err(AmountError::Invalid(s.to_string()));
    }
    let value = Decimal::from_str(s).map_err(|_| AmountError::Invalid(s.to_string()))?;
    if value <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    Ok(value)
}

fn scale_factor(decimals: u8) -> Result<Decimal, AmountError> {
    let factor = 10i128
        .checked_pow(u32::from(decimals))
        .ok_or(AmountError::Overflow)?;
    Ok(Decimal::from_i128_with_scale(factor, 0))
}

/// `floor(amount * 10^decimals)`.
pub fn to_base_units(input: &str, decimals: u8) -> Result<u64, AmountError> {
    let value = parse_positive(input)?;
    let scaled = value
        .checked_mul(scale_factor(decimals)?)
        .ok_or(AmountError::Overflow)?
        .floor();
    scaled.to_u64().ok_or(AmountError::Overflow)
}

pub fn from_base_units(units: u64, decimals: u8) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(units), u32::from(decimals))
}

/// Base units rendered with exactly `precision` fractional digits, truncated.
pub fn display_amount(units: u64, decimals: u8, precision: u32) -> String {
    let mut value =
        from_base_units(units, decimals).round_dp_with_strategy(precision, RoundingStrategy::ToZero);
    value.rescale(precision);
    value.to_string()
}

/// Compact amount for tight UI spots ("<0.0001", "12.3456", "1.50K", "2.10M").
pub fn format_compact(units: u64, decimals: u8) -> String {
    let value = from_base_units(units, decimals);
    if value.is_zero() {
        return "0".to_string();
    }
    let round = |v: Decimal, dp: u32| {
        let mut v = v.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
        v.rescale(dp);
        v.to_string()
    };
    let thousand = Decimal::from(1_000);
    let million = Decimal::from(1_000_000);
    if value < Decimal::new(1, 4) {
        "<0.0001".to_string()
    } else if value < Decimal::ONE {
        round(value, 6)
    } else if value < thousand {
        round(value, 4)
    } else if value < million {
        format!("{}K", round(value / thousand, 2))
    } else {
        format!("{}M", round(value / million, 2))
    }
}

/// Output tokens per input token: `out / in * 10^(in_decimals - out_decimals)`.
pub fn exchange_rate(in_units: u64, out_units: u64, in_decimals: u8, out_decimals: u8) -> Option<Decimal> {
    if in_units == 0 {
        return None;
    }
    from_base_units(out_units, out_decimals).checked_div(from_base_units(in_units, in_decimals))
}

/// Worst-case output after slippage: `floor(out * (1 - bps / 10000))`.
pub fn min_received(out_units: u64, slippage_bps: u16) -> u64 {
    let keep = 10_000u128.saturating_sub(u128::from(slippage_bps));
    (u128::from(out_units) * keep / 10_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_units_floor_the_fraction() {
        assert_eq!(to_base_units("10", 6), Ok(10_000_000));
        assert_eq!(to_base_units("0.1234567", 6), Ok(123_456));
        assert_eq!(to_base_units(" 1.5 ", 9), Ok(1_500_000_000));
        assert_eq!(to_base_units(".5", 2), Ok(50));
    }

    #[test]
    fn rejects_non_positive_and_garbage() {
        assert_eq!(to_base_units("", 6), Err(AmountError::Empty));
        assert_eq!(to_base_units("0", 6), Err(AmountError::NotPositive));
        assert_eq!(to_base_units("0.000", 6), Err(AmountError::NotPositive));
        assert!(matches!(to_base_units("-1", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(to_base_units("1.2.3", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(to_base_units(".", 6), Err(AmountError::Invalid(_))));
        assert_eq!(to_base_units("99999999999999999999", 9), Err(AmountError::Overflow));
    }

    #[test]
    fn amount_input_filter() {
        assert!(is_valid_amount_input(""));
        assert!(is_valid_amount_input("12."));
        assert!(!is_valid_amount_input("1e5"));
        assert!(!is_valid_amount_input("1,5"));
    }

    #[test]
    fn usdc_to_sol_quote_displays_exact_output_and_rate() {
        // 1 USDC (6 dp) in, 137 SOL (9 dp) out
        assert_eq!(display_amount(137_000_000_000, 9, 9), "137.000000000");
        assert_eq!(display_amount(137_000_000_000, 9, 4), "137.0000");

        let rate = exchange_rate(1_000_000, 137_000_000_000, 6, 9).unwrap();
        assert_eq!(rate, Decimal::from(137));
    }

    #[test]
    fn display_truncates_instead_of_rounding() {
        assert_eq!(display_amount(1_999_999, 6, 2), "1.99");
    }

    #[test]
    fn compact_formatting_bands() {
        assert_eq!(format_compact(0, 9), "0");
        assert_eq!(format_compact(50, 9), "<0.0001");
        assert_eq!(format_compact(500_000_000, 9), "0.500000");
        assert_eq!(format_compact(12_345_678, 6), "12.3457");
        assert_eq!(format_compact(1_500_000_000, 6), "1.50K");
        assert_eq!(format_compact(2_100_000_000_000, 6), "2.10M");
    }

    #[test]
    fn rate_undefined_for_zero_input() {
        assert_eq!(exchange_rate(0, 10, 6, 9), None);
    }

    #[test]
    fn min_received_applies_slippage_floor() {
        assert_eq!(min_received(1_000_000, 50), 995_000);
        assert_eq!(min_received(999, 100), 989);
        assert_eq!(min_received(1_000, 20_000), 0);
    }
}
