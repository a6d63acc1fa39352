use crate::config::Settings;
use crate::domain::{cross, RateTable};
use crate::ingest::daily::EcbDailyClient;
use crate::ingest::historic::HistoricArchiveClient;
use crate::storage::rates as store;
use crate::time::ecb_calendar;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// The query API the presentation layer consumes. Owns the store pool
/// and both feed clients; everything else renders what this returns.
pub struct ExchangeRateService {
    pool: SqlitePool,
    daily: EcbDailyClient,
    archive: HistoricArchiveClient,
    ingesting: AtomicBool,
    // Ingestion is not reentrant-safe; concurrent triggers queue here
    // instead of relying on caller discipline.
    ingest_lock: Mutex<()>,
}

impl ExchangeRateService {
    pub fn new(pool: SqlitePool, settings: &Settings) -> Result<Self> {
        Ok(Self {
            pool,
            daily: EcbDailyClient::from_settings(settings)?,
            archive: HistoricArchiveClient::from_settings(settings)?,
            ingesting: AtomicBool::new(false),
            ingest_lock: Mutex::new(()),
        })
    }

    /// Today's reference-denominated rate table.
    pub async fn daily_rates(&self, refresh: bool) -> Result<RateTable> {
        self.daily.rates(refresh).await
    }

    /// Sorted currency set of the daily snapshot.
    pub async fn currencies(&self) -> Result<BTreeSet<String>> {
        self.daily.currencies().await
    }

    /// Publication date of the daily snapshot.
    pub async fn snapshot_date(&self) -> Result<NaiveDate> {
        self.daily.date().await
    }

    /// The daily table re-based onto `base`, optionally scaled by a
    /// user-entered amount.
    pub async fn cross_rates(
        &self,
        base: &str,
        refresh: bool,
        factor: Option<Decimal>,
    ) -> Result<RateTable> {
        let reference = self.daily.rates(refresh).await?;
        let rebased = cross::cross_rates(&reference, base)?;
        match factor {
            Some(factor) => Ok(cross::scale(&rebased, factor)?),
            None => Ok(rebased),
        }
    }

    /// Date-ordered history of `currency` relative to `base`.
    pub async fn history_series(
        &self,
        currency: &str,
        base: &str,
    ) -> Result<BTreeMap<NaiveDate, f64>> {
        store::currency_history(&self.pool, currency, base).await
    }

    /// The stored day table for `date`, sorted by currency.
    pub async fn rates_on_date(&self, date: NaiveDate) -> Result<RateTable> {
        store::rates_on_date(&self.pool, date).await
    }

    /// Most recent stored value at or before `date`; 0.0 means no
    /// observation.
    pub async fn latest_rate_on_or_before(
        &self,
        currency: &str,
        date: NaiveDate,
    ) -> Result<f64> {
        store::latest_rate_on_or_before(&self.pool, currency, date).await
    }

    /// The complete stored archive grouped by date.
    pub async fn all_history(&self) -> Result<BTreeMap<NaiveDate, RateTable>> {
        store::all_history(&self.pool).await
    }

    /// Downloads and ingests the historical archive when the store is
    /// empty or the publication-schedule check says an update is due.
    /// Idempotent: re-running against an unchanged upstream inserts
    /// nothing. Returns the number of rows inserted.
    pub async fn ingest_if_stale(&self) -> Result<u64> {
        let _guard = self.ingest_lock.lock().await;
        self.ingesting.store(true, Ordering::SeqCst);
        let result = self.ingest_inner().await;
        self.ingesting.store(false, Ordering::SeqCst);
        result
    }

    /// Polled by the presentation layer to disable actions that depend
    /// on a settled store.
    pub fn is_ingesting(&self) -> bool {
        self.ingesting.load(Ordering::SeqCst)
    }

    async fn ingest_inner(&self) -> Result<u64> {
        let stale = match store::max_date(&self.pool).await? {
            // Empty store: the very first run always ingests.
            None => true,
            Some(max_date) => ecb_calendar::data_needs_update(max_date, Utc::now()),
        };
        if !stale {
            tracing::debug!("historical store is current; skipping ingestion");
            return Ok(0);
        }

        let days = self.archive.fetch().await?;
        let inserted = store::insert_missing(&self.pool, &days).await?;
        tracing::info!(inserted, days = days.len(), "historical ingestion complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;

    #[tokio::test]
    async fn starts_idle_and_answers_store_queries() {
        let pool = memory_pool().await;
        let service = ExchangeRateService::new(pool, &Settings::default()).unwrap();

        assert!(!service.is_ingesting());
        assert!(service.all_history().await.unwrap().is_empty());
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(service.rates_on_date(date).await.unwrap().is_empty());
        assert_eq!(
            service.latest_rate_on_or_before("USD", date).await.unwrap(),
            0.0
        );
    }
}
