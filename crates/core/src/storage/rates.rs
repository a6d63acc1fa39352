use crate::domain::{cross, RateTable, REFERENCE_CURRENCY};
use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeMap;

// SQLite's default bind-variable budget comfortably fits 200 rows of
// three columns per statement.
const INSERT_CHUNK_ROWS: usize = 200;

/// Inserts every (date, currency) pair that is not already stored.
/// Historical records are append-only: existing pairs are left untouched,
/// which makes re-ingestion a no-op. The whole batch runs in one
/// transaction, committed at the end, so readers never observe a
/// partially ingested archive. Returns the number of rows actually
/// inserted.
pub async fn insert_missing(
    pool: &SqlitePool,
    days: &BTreeMap<NaiveDate, RateTable>,
) -> anyhow::Result<u64> {
    let rows: Vec<(NaiveDate, &str, f64)> = days
        .iter()
        .flat_map(|(date, table)| {
            table
                .iter()
                .map(move |(currency, value)| (*date, currency.as_str(), *value))
        })
        .collect();

    if rows.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let mut inserted: u64 = 0;

    for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO euro_exchange_rates (date, currency, value) ");
        qb.push_values(chunk, |mut b, (date, currency, value)| {
            b.push_bind(*date).push_bind(*currency).push_bind(*value);
        });
        qb.push(" ON CONFLICT (date, currency) DO NOTHING");

        let res = qb
            .build()
            .execute(&mut *tx)
            .await
            .context("batch insert euro_exchange_rates failed")?;
        inserted += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(inserted)
}

pub async fn count(pool: &SqlitePool) -> anyhow::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM euro_exchange_rates")
        .fetch_one(pool)
        .await
        .context("count euro_exchange_rates failed")
}

/// The most recent stored date, used by the staleness check. `None` on
/// an empty store.
pub async fn max_date(pool: &SqlitePool) -> anyhow::Result<Option<NaiveDate>> {
    sqlx::query_scalar("SELECT MAX(date) FROM euro_exchange_rates")
        .fetch_one(pool)
        .await
        .context("query max stored date failed")
}

/// All (currency, value) pairs stored for one date, sorted by currency
/// code. Empty when the date has no data.
pub async fn rates_on_date(pool: &SqlitePool, date: NaiveDate) -> anyhow::Result<RateTable> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT currency, value FROM euro_exchange_rates \
         WHERE date = ?1 ORDER BY currency ASC",
    )
    .bind(date)
    .fetch_all(pool)
    .await
    .context("query rates on date failed")?;

    Ok(rows.into_iter().collect())
}

/// The most recent stored value for `currency` at or before `date`.
/// Returns 0.0 when nothing is stored, the same sentinel the feed uses
/// for "no observation".
pub async fn latest_rate_on_or_before(
    pool: &SqlitePool,
    currency: &str,
    date: NaiveDate,
) -> anyhow::Result<f64> {
    let row: Option<(f64,)> = sqlx::query_as(
        "SELECT value FROM euro_exchange_rates \
         WHERE currency = ?1 AND date <= ?2 \
         ORDER BY date DESC LIMIT 1",
    )
    .bind(currency.to_uppercase())
    .bind(date)
    .fetch_optional(pool)
    .await
    .context("query latest rate failed")?;

    Ok(row.map(|(value,)| value).unwrap_or(0.0))
}

/// Date-ordered history of `currency` relative to `base`.
///
/// Against the reference currency this is the stored series itself,
/// no-observation rows excluded. Against any other base it is an inner
/// join on date, keeping only dates where both sides have a non-zero
/// value, each ratio rounded HALF_UP to 4 decimals in decimal
/// arithmetic so it matches the cross-rate calculator exactly.
pub async fn currency_history(
    pool: &SqlitePool,
    currency: &str,
    base: &str,
) -> anyhow::Result<BTreeMap<NaiveDate, f64>> {
    if base == REFERENCE_CURRENCY {
        let rows: Vec<(NaiveDate, f64)> = sqlx::query_as(
            "SELECT date, value FROM euro_exchange_rates \
             WHERE currency = ?1 AND value > 0 ORDER BY date ASC",
        )
        .bind(currency.to_uppercase())
        .fetch_all(pool)
        .await
        .context("query currency history failed")?;
        return Ok(rows.into_iter().collect());
    }

    let rows: Vec<(NaiveDate, f64, f64)> = sqlx::query_as(
        "SELECT t1.date, t1.value, t2.value \
         FROM euro_exchange_rates AS t1 \
         INNER JOIN euro_exchange_rates AS t2 \
             ON t1.date = t2.date AND t2.currency = ?1 \
         WHERE t1.currency = ?2 AND t1.value > 0 AND t2.value > 0 \
         ORDER BY t1.date ASC",
    )
    .bind(base.to_uppercase())
    .bind(currency.to_uppercase())
    .fetch_all(pool)
    .await
    .context("query cross-base history failed")?;

    let mut series = BTreeMap::new();
    for (date, value, base_value) in rows {
        series.insert(date, cross::ratio_4dp(currency, value, base_value)?);
    }
    Ok(series)
}

/// The full store content grouped by date, ascending; each day's table
/// is sorted by currency code.
pub async fn all_history(pool: &SqlitePool) -> anyhow::Result<BTreeMap<NaiveDate, RateTable>> {
    let rows: Vec<(NaiveDate, String, f64)> = sqlx::query_as(
        "SELECT date, currency, value FROM euro_exchange_rates \
         ORDER BY date ASC, currency ASC",
    )
    .fetch_all(pool)
    .await
    .context("query full history failed")?;

    let mut grouped: BTreeMap<NaiveDate, RateTable> = BTreeMap::new();
    for (date, currency, value) in rows {
        grouped.entry(date).or_default().insert(currency, value);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;

    fn day(entries: &[(&str, f64)]) -> RateTable {
        entries.iter().map(|(c, v)| (c.to_string(), *v)).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn two_days() -> BTreeMap<NaiveDate, RateTable> {
        let mut days = BTreeMap::new();
        days.insert(
            date(2024, 1, 2),
            day(&[("EUR", 1.0), ("USD", 1.10), ("GBP", 0.85)]),
        );
        days.insert(
            date(2024, 1, 3),
            day(&[("EUR", 1.0), ("USD", 1.12), ("GBP", 0.0)]),
        );
        days
    }

    #[tokio::test]
    async fn ingestion_is_idempotent() {
        let pool = memory_pool().await;
        let days = two_days();

        assert_eq!(insert_missing(&pool, &days).await.unwrap(), 6);
        assert_eq!(count(&pool).await.unwrap(), 6);

        // Second run against the same upstream snapshot writes nothing.
        assert_eq!(insert_missing(&pool, &days).await.unwrap(), 0);
        assert_eq!(count(&pool).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn only_new_pairs_are_inserted() {
        let pool = memory_pool().await;
        let mut days = two_days();
        insert_missing(&pool, &days).await.unwrap();

        days.insert(date(2024, 1, 4), day(&[("EUR", 1.0), ("USD", 1.11)]));
        assert_eq!(insert_missing(&pool, &days).await.unwrap(), 2);
        assert_eq!(count(&pool).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn day_table_is_sorted_by_currency() {
        let pool = memory_pool().await;
        insert_missing(&pool, &two_days()).await.unwrap();

        let table = rates_on_date(&pool, date(2024, 1, 2)).await.unwrap();
        let codes: Vec<&str> = table.keys().map(String::as_str).collect();
        assert_eq!(codes, vec!["EUR", "GBP", "USD"]);
        assert_eq!(table.get("USD").copied(), Some(1.10));

        assert!(rates_on_date(&pool, date(2023, 12, 29))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn latest_rate_walks_back_to_the_previous_date() {
        let pool = memory_pool().await;
        insert_missing(&pool, &two_days()).await.unwrap();

        let rate = latest_rate_on_or_before(&pool, "USD", date(2024, 1, 5))
            .await
            .unwrap();
        assert_eq!(rate, 1.12);

        let rate = latest_rate_on_or_before(&pool, "USD", date(2024, 1, 2))
            .await
            .unwrap();
        assert_eq!(rate, 1.10);

        // Nothing stored at or before the date: the no-observation sentinel.
        let rate = latest_rate_on_or_before(&pool, "USD", date(2023, 1, 1))
            .await
            .unwrap();
        assert_eq!(rate, 0.0);
    }

    #[tokio::test]
    async fn reference_history_excludes_no_observation_rows() {
        let pool = memory_pool().await;
        insert_missing(&pool, &two_days()).await.unwrap();

        let series = currency_history(&pool, "GBP", REFERENCE_CURRENCY)
            .await
            .unwrap();
        // GBP has value 0.0 on 2024-01-03; that date must be absent.
        assert_eq!(series.len(), 1);
        assert_eq!(series.get(&date(2024, 1, 2)).copied(), Some(0.85));
    }

    #[tokio::test]
    async fn cross_base_history_joins_and_rounds() {
        let pool = memory_pool().await;
        insert_missing(&pool, &two_days()).await.unwrap();

        let series = currency_history(&pool, "USD", "GBP").await.unwrap();
        // 2024-01-03 is excluded because GBP has no observation there.
        assert_eq!(series.len(), 1);
        // 1.10 / 0.85 = 1.29411... -> 1.2941.
        assert_eq!(series.get(&date(2024, 1, 2)).copied(), Some(1.2941));
    }

    #[tokio::test]
    async fn full_history_groups_by_date_ascending() {
        let pool = memory_pool().await;
        insert_missing(&pool, &two_days()).await.unwrap();

        let grouped = all_history(&pool).await.unwrap();
        let dates: Vec<NaiveDate> = grouped.keys().copied().collect();
        assert_eq!(dates, vec![date(2024, 1, 2), date(2024, 1, 3)]);
        assert_eq!(grouped.get(&date(2024, 1, 3)).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn max_date_tracks_the_newest_row() {
        let pool = memory_pool().await;
        assert_eq!(max_date(&pool).await.unwrap(), None);

        insert_missing(&pool, &two_days()).await.unwrap();
        assert_eq!(max_date(&pool).await.unwrap(), Some(date(2024, 1, 3)));
    }
}
