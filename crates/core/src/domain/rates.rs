use chrono::NaiveDate;
use std::collections::BTreeMap;

/// The currency all fetched and stored rates are denominated against.
/// Its rate against itself is always exactly 1.0.
pub const REFERENCE_CURRENCY: &str = "EUR";

/// "1 unit of the reference currency = value units of the key currency",
/// keyed by 3-letter currency code. A stored value of 0.0 means the feed
/// published no observation for that currency, never a true zero rate.
pub type RateTable = BTreeMap<String, f64>;

/// One day's complete rate table as published by the daily feed.
/// Immutable once fetched; a refresh replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub rates: RateTable,
}

/// Logical and format failures callers must be able to tell apart from
/// transport or persistence errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateError {
    #[error("currency {0} is not present in the rate table")]
    UnknownCurrency(String),

    #[error("currency {0} has no observation (stored rate is 0)")]
    NoObservation(String),

    #[error("scale factor must be positive (got {0})")]
    NonPositiveFactor(rust_decimal::Decimal),

    #[error("rate value {value} for {currency} is not a valid decimal")]
    InvalidValue { currency: String, value: f64 },
}
