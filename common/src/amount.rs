//! Conversions between alt base units and fiat amounts.
//!
//! Alt amounts travel as integer base units ("probi"), scaled by the asset's
//! decimals. Fiat amounts are rounded to the currency's minor units.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::symbol::Symbol;

/// Standard decimal places for a fiat currency.
pub fn fiat_decimal_places(fiat: &Symbol) -> u32 {
    match fiat.code() {
        "JPY" | "KRW" | "VND" => 0,
        "BHD" | "KWD" | "OMR" => 3,
        _ => 2,
    }
}

/// `10^decimals` as a decimal, if representable.
pub fn unit_scale(decimals: u32) -> Option<Decimal> {
    10i64
        .checked_pow(decimals)
        .map(Decimal::from)
        .or_else(|| 10i128.checked_pow(decimals).and_then(Decimal::from_i128))
}

/// Convert a floating rate into a decimal, rejecting non-positive values.
pub fn rate_to_decimal(rate: f64) -> Option<Decimal> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    Decimal::from_f64(rate)
}

/// Convert alt base units into a fiat amount.
///
/// `rate` is the fiat value of one whole alt unit.
pub fn alt_to_fiat(probi: Decimal, decimals: u32, fiat: &Symbol, rate: Decimal) -> Option<Decimal> {
    let whole = probi.checked_div(unit_scale(decimals)?)?;
    let value = whole.checked_mul(rate)?;
    Some(value.round_dp(fiat_decimal_places(fiat)))
}

/// Convert a fiat amount into alt base units, rounding down.
pub fn fiat_to_alt(amount: Decimal, decimals: u32, rate: Decimal) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    let whole = amount.checked_div(rate)?;
    Some(whole.checked_mul(unit_scale(decimals)?)?.floor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fiat_decimal_places() {
        assert_eq!(fiat_decimal_places(&Symbol::usd()), 2);
        assert_eq!(fiat_decimal_places(&Symbol::new("JPY")), 0);
        assert_eq!(fiat_decimal_places(&Symbol::new("BHD")), 3);
    }

    #[test]
    fn test_unit_scale() {
        assert_eq!(unit_scale(0), Some(dec!(1)));
        assert_eq!(unit_scale(8), Some(dec!(100000000)));
        assert_eq!(unit_scale(18), Some(dec!(1000000000000000000)));
    }

    #[test]
    fn test_alt_to_fiat() {
        // 2.5 BAT at 0.2613 USD
        let probi = dec!(2500000000000000000);
        let usd = alt_to_fiat(probi, 18, &Symbol::usd(), dec!(0.2613)).unwrap();
        assert_eq!(usd, dec!(0.65));

        let yen = alt_to_fiat(probi, 18, &Symbol::new("JPY"), dec!(27.5)).unwrap();
        assert_eq!(yen, dec!(69));
    }

    #[test]
    fn test_fiat_to_alt_rounds_down() {
        // 1 USD at 3 USD per unit with 8 decimals
        let units = fiat_to_alt(dec!(1), 8, dec!(3)).unwrap();
        assert_eq!(units, dec!(33333333));
    }

    #[test]
    fn test_fiat_to_alt_rejects_zero_rate() {
        assert!(fiat_to_alt(dec!(1), 18, Decimal::ZERO).is_none());
    }

    #[test]
    fn test_rate_to_decimal() {
        assert_eq!(rate_to_decimal(0.5), Some(dec!(0.5)));
        assert!(rate_to_decimal(0.0).is_none());
        assert!(rate_to_decimal(f64::NAN).is_none());
    }
}
