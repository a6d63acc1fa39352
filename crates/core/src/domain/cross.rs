use crate::domain::{RateError, RateTable, REFERENCE_CURRENCY};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

const HALF_UP: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// Re-bases a reference-denominated rate table onto `base`.
///
/// When `base` is the reference currency the table passes through
/// unchanged (no re-rounding). Otherwise every entry becomes
/// `round(source[c] / source[base], 4)` HALF_UP, re-rendered through a
/// magnitude-tiered display rounding (also HALF_UP): values below 1 keep
/// 5 fractional digits, values in [1, 100) keep 4, values of 100 or more
/// keep 2. The two rounding stages are applied in sequence on purpose;
/// downstream consumers depend on numeric parity with historical output.
pub fn cross_rates(reference: &RateTable, base: &str) -> Result<RateTable, RateError> {
    if base == REFERENCE_CURRENCY {
        return Ok(reference.clone());
    }

    let base_rate = reference
        .get(base)
        .copied()
        .ok_or_else(|| RateError::UnknownCurrency(base.to_string()))?;
    if base_rate == 0.0 {
        return Err(RateError::NoObservation(base.to_string()));
    }
    let divisor = to_decimal(base, base_rate)?;

    let mut rebased = RateTable::new();
    for (currency, value) in reference {
        let quotient = to_decimal(currency, *value)
            .and_then(|v| {
                v.checked_div(divisor)
                    .ok_or_else(|| RateError::NoObservation(base.to_string()))
            })?
            .round_dp_with_strategy(4, HALF_UP);

        let displayed = if quotient < Decimal::ONE {
            quotient.round_dp_with_strategy(5, HALF_UP)
        } else if quotient < Decimal::ONE_HUNDRED {
            quotient.round_dp_with_strategy(4, HALF_UP)
        } else {
            quotient.round_dp_with_strategy(2, HALF_UP)
        };

        let displayed = displayed.to_f64().ok_or(RateError::InvalidValue {
            currency: currency.clone(),
            value: *value,
        })?;
        rebased.insert(currency.clone(), displayed);
    }

    Ok(rebased)
}

/// Multiplies every rate by a positive factor (e.g. a user-entered
/// amount), rounding each product to 4 decimals with CEILING so a
/// converted amount is never under-quoted. A factor of exactly 1 is a
/// pass-through.
pub fn scale(rates: &RateTable, factor: Decimal) -> Result<RateTable, RateError> {
    if factor <= Decimal::ZERO {
        return Err(RateError::NonPositiveFactor(factor));
    }
    if factor == Decimal::ONE {
        return Ok(rates.clone());
    }

    let mut scaled = RateTable::new();
    for (currency, value) in rates {
        let product = (to_decimal(currency, *value)? * factor)
            .round_dp_with_strategy(4, RoundingStrategy::ToPositiveInfinity);
        let product = product.to_f64().ok_or(RateError::InvalidValue {
            currency: currency.clone(),
            value: *value,
        })?;
        scaled.insert(currency.clone(), product);
    }

    Ok(scaled)
}

/// `round(value / base, 4)` HALF_UP in decimal; the rounding used by the
/// history join.
pub fn ratio_4dp(currency: &str, value: f64, base: f64) -> Result<f64, RateError> {
    let quotient = to_decimal(currency, value)?
        .checked_div(to_decimal(currency, base)?)
        .ok_or_else(|| RateError::NoObservation(currency.to_string()))?
        .round_dp_with_strategy(4, HALF_UP);
    quotient.to_f64().ok_or(RateError::InvalidValue {
        currency: currency.to_string(),
        value,
    })
}

// Converts through the shortest display string so the decimal operand
// matches the feed's published digits rather than the full binary
// expansion of the f64.
fn to_decimal(currency: &str, value: f64) -> Result<Decimal, RateError> {
    Decimal::from_str(&value.to_string()).map_err(|_| RateError::InvalidValue {
        currency: currency.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, f64)]) -> RateTable {
        entries
            .iter()
            .map(|(c, v)| (c.to_string(), *v))
            .collect()
    }

    #[test]
    fn rebases_with_mid_tier_rounding() {
        let reference = table(&[("EUR", 1.0), ("USD", 1.0852), ("GBP", 0.8587)]);
        let rebased = cross_rates(&reference, "GBP").unwrap();
        // 1.0852 / 0.8587 = 1.26377..., 4 dp HALF_UP -> 1.2638, [1, 100) tier.
        assert_eq!(rebased.get("USD").copied().unwrap(), 1.2638);
        assert_eq!(rebased.get("GBP").copied().unwrap(), 1.0);
    }

    #[test]
    fn low_tier_keeps_five_decimals() {
        let reference = table(&[("EUR", 1.0), ("USD", 1.0852)]);
        let rebased = cross_rates(&reference, "USD").unwrap();
        // 1 / 1.0852 = 0.92148..., 4 dp -> 0.9215, < 1 tier re-rounds at 5 dp.
        assert_eq!(rebased.get("EUR").copied().unwrap(), 0.9215);
    }

    #[test]
    fn high_tier_truncates_to_two_decimals() {
        let reference = table(&[("EUR", 1.0), ("JPY", 161.2), ("GBP", 0.8587)]);
        let rebased = cross_rates(&reference, "GBP").unwrap();
        // 161.2 / 0.8587 = 187.72563..., 4 dp -> 187.7256, >= 100 tier -> 187.73.
        assert_eq!(rebased.get("JPY").copied().unwrap(), 187.73);
    }

    #[test]
    fn reference_base_is_a_pass_through() {
        let reference = table(&[("EUR", 1.0), ("USD", 1.08523)]);
        let rebased = cross_rates(&reference, "EUR").unwrap();
        assert_eq!(rebased, reference);
    }

    #[test]
    fn base_rebased_to_itself_is_unity() {
        let reference = table(&[("EUR", 1.0), ("USD", 1.0852), ("CHF", 0.9341)]);
        let rebased = cross_rates(&reference, "CHF").unwrap();
        assert_eq!(rebased.get("CHF").copied().unwrap(), 1.0);
    }

    #[test]
    fn zero_base_is_rejected() {
        let reference = table(&[("EUR", 1.0), ("CYP", 0.0)]);
        let err = cross_rates(&reference, "CYP").unwrap_err();
        assert_eq!(err, RateError::NoObservation("CYP".to_string()));
    }

    #[test]
    fn unknown_base_is_rejected() {
        let reference = table(&[("EUR", 1.0)]);
        let err = cross_rates(&reference, "XXX").unwrap_err();
        assert_eq!(err, RateError::UnknownCurrency("XXX".to_string()));
    }

    #[test]
    fn scaling_rounds_with_ceiling() {
        let rates = table(&[("ABC", 3.33)]);
        let scaled = scale(&rates, Decimal::from_str("1.0001").unwrap()).unwrap();
        // 3.33 * 1.0001 = 3.330333 -> CEILING at 4 dp gives 3.3304
        // (HALF_UP would give 3.3303).
        assert_eq!(scaled.get("ABC").copied().unwrap(), 3.3304);
    }

    #[test]
    fn unit_factor_is_a_pass_through() {
        let rates = table(&[("USD", 1.0852)]);
        assert_eq!(scale(&rates, Decimal::ONE).unwrap(), rates);
    }

    #[test]
    fn non_positive_factor_is_rejected() {
        let rates = table(&[("USD", 1.0852)]);
        let err = scale(&rates, Decimal::ZERO).unwrap_err();
        assert_eq!(err, RateError::NonPositiveFactor(Decimal::ZERO));
    }

    #[test]
    fn ratio_matches_half_up_at_four_decimals() {
        // 1.10 / 0.85 = 1.29411... -> 1.2941
        assert_eq!(ratio_4dp("USD", 1.10, 0.85).unwrap(), 1.2941);
    }
}
