//! Conversion between the wallet's atomic units and decimal XMR amounts.
//!
//! One XMR is 10^12 atomic units ("piconero"). Decimal amounts carry exactly
//! twelve fractional digits.

use crate::error::{FaucetError, FaucetResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Number of fractional digits in a decimal XMR amount
pub const ATOMIC_SCALE: u32 = 12;

/// Atomic units in one XMR
pub const ATOMIC_UNITS_PER_XMR: u64 = 1_000_000_000_000;

/// Converts an atomic amount into decimal XMR, quantized to 12 digits.
pub fn to_decimal(atomic: u64) -> Decimal {
    Decimal::from_i128_with_scale(atomic as i128, ATOMIC_SCALE)
        .round_dp_with_strategy(ATOMIC_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Converts a decimal XMR amount into atomic units, truncating toward zero.
pub fn to_atomic(decimal: Decimal) -> FaucetResult<u64> {
    if decimal < Decimal::ZERO {
        return Err(FaucetError::InvalidAmount(format!(
            "negative amount {}",
            decimal
        )));
    }

    decimal
        .checked_mul(Decimal::from(ATOMIC_UNITS_PER_XMR))
        .and_then(|scaled| scaled.trunc().to_u64())
        .ok_or_else(|| FaucetError::InvalidAmount(format!("amount {} out of range", decimal)))
}

/// Parses a decimal string such as `"4.76"` and converts it into atomic units.
pub fn parse_atomic(value: &str) -> FaucetResult<u64> {
    let decimal = Decimal::from_str(value.trim())
        .map_err(|e| FaucetError::InvalidAmount(format!("'{}': {}", value, e)))?;
    to_atomic(decimal)
}

/// Whole XMR contained in an atomic amount, fractional part dropped
pub fn whole_units(atomic: u64) -> u64 {
    atomic / ATOMIC_UNITS_PER_XMR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_decimal_to_atomic() {
        assert_eq!(to_atomic(Decimal::from(12)).unwrap(), 12_000_000_000_000);
        assert_eq!(parse_atomic("12").unwrap(), 12_000_000_000_000);
        assert_eq!(parse_atomic("4.76").unwrap(), 4_760_000_000_000);
        assert_eq!(parse_atomic("0.08").unwrap(), 80_000_000_000);
    }

    #[test]
    fn test_atomic_to_decimal() {
        assert_eq!(to_decimal(12_000_000_000_000), Decimal::from(12));
        assert_eq!(to_decimal(4_760_000_000_000), dec("4.76"));
        assert_eq!(to_decimal(80_000_000_000), dec("0.08"));
        assert_eq!(to_decimal(1), dec("0.000000000001"));
        assert_eq!(to_decimal(0), Decimal::ZERO);
    }

    #[test]
    fn test_to_decimal_keeps_twelve_digits() {
        assert_eq!(to_decimal(4_760_000_000_000).scale(), ATOMIC_SCALE);
        assert_eq!(to_decimal(4_760_000_000_000).to_string(), "4.760000000000");
    }

    #[test]
    fn test_to_atomic_truncates() {
        // Digits beyond the twelfth are dropped, never rounded up
        assert_eq!(parse_atomic("0.0000000000019").unwrap(), 1);
        assert_eq!(parse_atomic("1.9999999999999").unwrap(), 1_999_999_999_999);
    }

    #[test]
    fn test_atomic_round_trip() {
        let samples = [
            0u64,
            1,
            999,
            80_000_000_000,
            4_760_000_000_000,
            19_769_691_509_258_199,
            u64::MAX,
        ];
        for atomic in samples {
            assert_eq!(to_atomic(to_decimal(atomic)).unwrap(), atomic);
        }
    }

    #[test]
    fn test_decimal_round_trip() {
        for s in ["4.76", "0.08", "12", "0.000000000001", "19769.691509258199"] {
            let d = to_decimal(parse_atomic(s).unwrap());
            assert_eq!(to_decimal(to_atomic(d).unwrap()), d);
            assert_eq!(d, dec(s));
        }
    }

    #[test]
    fn test_invalid_amounts() {
        assert!(matches!(parse_atomic("-1"), Err(FaucetError::InvalidAmount(_))));
        assert!(matches!(parse_atomic("abc"), Err(FaucetError::InvalidAmount(_))));
        assert!(matches!(parse_atomic(""), Err(FaucetError::InvalidAmount(_))));
        // Larger than u64 atomic units
        assert!(matches!(
            parse_atomic("100000000000"),
            Err(FaucetError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_whole_units() {
        assert_eq!(whole_units(19_769_691_509_258_199), 19_769);
        assert_eq!(whole_units(999_999_999_999), 0);
    }
}
