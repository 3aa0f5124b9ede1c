use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::constants::{SATS_IN_BIT, SATS_IN_BTC, SATS_IN_MBTC};

/// Signed satoshi amount. Positive is money received, negative is money sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64); // Stored in satoshis for precision

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_sats(sats: i64) -> Self {
        Self(sats)
    }

    pub const fn to_sats(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> Amount {
        Amount(self.0.saturating_abs())
    }

    /// Clamp negative amounts to zero.
    pub fn non_negative(self) -> Amount {
        Amount(self.0.max(0))
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// `self * numerator / denominator` with a 128-bit intermediate, truncating
    /// toward zero. A zero denominator yields zero.
    pub fn mul_div(self, numerator: i64, denominator: i64) -> Amount {
        if denominator == 0 {
            return Amount::ZERO;
        }
        let wide = self.0 as i128 * numerator as i128 / denominator as i128;
        Amount(wide.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Display string in the given unit, without label.
    pub fn to_unit(self, unit: BitcoinUnit) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let (divisor, decimals) = match unit {
            BitcoinUnit::Bitcoin => (SATS_IN_BTC as u64, 8),
            BitcoinUnit::MilliBitcoin => (SATS_IN_MBTC as u64, 5),
            BitcoinUnit::Bit => (SATS_IN_BIT as u64, 2),
            BitcoinUnit::Sat | BitcoinUnit::Satoshi => return format!("{}{}", sign, magnitude),
        };
        format!(
            "{}{}.{:0width$}",
            sign,
            magnitude / divisor,
            magnitude % divisor,
            width = decimals
        )
    }

    /// Display string followed by the unit label, e.g. `0.00021000 BTC`.
    pub fn format(self, unit: BitcoinUnit) -> String {
        format!("{} {}", self.to_unit(unit), unit.label(self))
    }

    /// Fiat value rounded to two decimals. Display boundary only.
    pub fn to_fiat(self, rate: f64) -> f64 {
        let value = (self.0 as f64 / SATS_IN_BTC as f64) * rate;
        (value * 100.0).round() / 100.0
    }

    /// Amount for a fiat value at the given BTC rate, rounded to whole sats.
    pub fn from_fiat(value: f64, rate: f64) -> Amount {
        if rate <= 0.0 || !value.is_finite() {
            return Amount::ZERO;
        }
        Amount(((value / rate) * SATS_IN_BTC as f64).round() as i64)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, other: Amount) {
        *self = *self + other;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, other: Amount) {
        *self = *self - other;
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// Display unit for bitcoin amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BitcoinUnit {
    Bitcoin,
    MilliBitcoin,
    Bit,
    #[default]
    Sat,
    Satoshi,
}

impl BitcoinUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            BitcoinUnit::Bitcoin => "bitcoin",
            BitcoinUnit::MilliBitcoin => "milliBitcoin",
            BitcoinUnit::Bit => "bit",
            BitcoinUnit::Sat => "sat",
            BitcoinUnit::Satoshi => "satoshi",
        }
    }

    /// Short label shown next to an amount.
    pub fn label(&self, amount: Amount) -> &'static str {
        let singular = amount.abs() == Amount::from_sats(self.sats_per_unit());
        match self {
            BitcoinUnit::Bitcoin => "BTC",
            BitcoinUnit::MilliBitcoin => "mBTC",
            BitcoinUnit::Bit if singular => "bit",
            BitcoinUnit::Bit => "bits",
            BitcoinUnit::Sat => "sat",
            BitcoinUnit::Satoshi if singular => "satoshi",
            BitcoinUnit::Satoshi => "satoshis",
        }
    }

    fn sats_per_unit(&self) -> i64 {
        match self {
            BitcoinUnit::Bitcoin => SATS_IN_BTC,
            BitcoinUnit::MilliBitcoin => SATS_IN_MBTC,
            BitcoinUnit::Bit => SATS_IN_BIT,
            BitcoinUnit::Sat | BitcoinUnit::Satoshi => 1,
        }
    }
}

impl FromStr for BitcoinUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bitcoin" | "btc" => Ok(BitcoinUnit::Bitcoin),
            "milliBitcoin" | "mbtc" => Ok(BitcoinUnit::MilliBitcoin),
            "bit" | "bits" => Ok(BitcoinUnit::Bit),
            "sat" => Ok(BitcoinUnit::Sat),
            "satoshi" => Ok(BitcoinUnit::Satoshi),
            other => Err(format!("unknown bitcoin unit: {}", other)),
        }
    }
}

impl fmt::Display for BitcoinUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_unit_formats() {
        let amount = Amount::from_sats(123_456_789);
        assert_eq!(amount.to_unit(BitcoinUnit::Bitcoin), "1.23456789");
        assert_eq!(amount.to_unit(BitcoinUnit::MilliBitcoin), "1234.56789");
        assert_eq!(amount.to_unit(BitcoinUnit::Bit), "1234567.89");
        assert_eq!(amount.to_unit(BitcoinUnit::Sat), "123456789");
        assert_eq!(amount.to_unit(BitcoinUnit::Satoshi), "123456789");
    }

    #[test]
    fn test_to_unit_negative_and_small() {
        assert_eq!(Amount::from_sats(-2_100).to_unit(BitcoinUnit::Bitcoin), "-0.00002100");
        assert_eq!(Amount::from_sats(5).to_unit(BitcoinUnit::Bit), "0.05");
        assert_eq!(Amount::from_sats(i64::MIN).to_unit(BitcoinUnit::Sat), "-9223372036854775808");
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // i64::MAX * 100 would overflow a 64-bit multiply
        let big = Amount::from_sats(i64::MAX / 2);
        assert_eq!(big.mul_div(100, 100), big);
        assert_eq!(Amount::from_sats(2_500).mul_div(100, 10_000), Amount::from_sats(25));
        assert_eq!(Amount::from_sats(999).mul_div(100, 1_000), Amount::from_sats(99));
    }

    #[test]
    fn test_mul_div_zero_denominator() {
        assert_eq!(Amount::from_sats(5_000).mul_div(100, 0), Amount::ZERO);
    }

    #[test]
    fn test_mul_div_saturates() {
        assert_eq!(Amount::from_sats(i64::MAX).mul_div(100, 1), Amount::from_sats(i64::MAX));
    }

    #[test]
    fn test_saturating_ops() {
        assert_eq!(Amount::from_sats(i64::MAX) + Amount::from_sats(1), Amount::from_sats(i64::MAX));
        assert_eq!(Amount::from_sats(10) - Amount::from_sats(25), Amount::from_sats(-15));
        assert!(Amount::from_sats(i64::MIN).checked_sub(Amount::from_sats(1)).is_none());
        assert!(Amount::from_sats(i64::MAX).checked_add(Amount::from_sats(1)).is_none());
    }

    #[test]
    fn test_fiat_conversion() {
        let amount = Amount::from_sats(100_000);
        assert!((amount.to_fiat(60_000.0) - 60.0).abs() < 0.001);
        assert!((Amount::from_sats(1).to_fiat(60_000.0) - 0.0).abs() < 0.001);
        assert_eq!(Amount::from_fiat(60.0, 60_000.0), amount);
        assert_eq!(Amount::from_fiat(60.0, 0.0), Amount::ZERO);
    }

    #[test]
    fn test_unit_labels_and_parse() {
        assert_eq!(BitcoinUnit::Satoshi.label(Amount::from_sats(1)), "satoshi");
        assert_eq!(BitcoinUnit::Satoshi.label(Amount::from_sats(2)), "satoshis");
        assert_eq!(BitcoinUnit::Bit.label(Amount::from_sats(100)), "bit");
        assert_eq!(Amount::from_sats(21_000).format(BitcoinUnit::Bitcoin), "0.00021000 BTC");
        assert_eq!("milliBitcoin".parse::<BitcoinUnit>().unwrap(), BitcoinUnit::MilliBitcoin);
        assert!("furlong".parse::<BitcoinUnit>().is_err());
    }
}
