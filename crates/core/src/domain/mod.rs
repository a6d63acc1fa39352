pub mod cross;
pub mod rates;

pub use rates::{DailySnapshot, RateError, RateTable, REFERENCE_CURRENCY};
