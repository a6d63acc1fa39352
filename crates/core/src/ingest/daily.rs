use crate::config::Settings;
use crate::domain::{DailySnapshot, RateTable, REFERENCE_CURRENCY};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const FETCH_RETRIES: u32 = 3;

/// Serves "today's" rate table from a process-wide cache, refreshing it
/// wholesale from the daily XML feed on demand. The cache sits behind a
/// read-write lock; concurrent refreshes serialize on the write lock
/// instead of racing. A failed fetch leaves the previous snapshot in
/// place (stale-but-available) and propagates the error.
#[derive(Debug)]
pub struct EcbDailyClient {
    http: reqwest::Client,
    url: String,
    cache: RwLock<Option<DailySnapshot>>,
}

impl EcbDailyClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build daily feed http client")?;

        Ok(Self {
            http,
            url: settings.daily_xml_url().to_string(),
            cache: RwLock::new(None),
        })
    }

    /// The cached rate table, fetching first when `refresh` is set or
    /// nothing is cached yet.
    pub async fn rates(&self, refresh: bool) -> Result<RateTable> {
        Ok(self.snapshot(refresh).await?.rates)
    }

    /// Publication date of the current snapshot.
    pub async fn date(&self) -> Result<NaiveDate> {
        Ok(self.snapshot(false).await?.date)
    }

    /// Sorted currency set of the current snapshot. Derived from the
    /// live snapshot rather than cached separately, so a refresh that
    /// changes the currency list is reflected here.
    pub async fn currencies(&self) -> Result<BTreeSet<String>> {
        Ok(self.snapshot(false).await?.rates.into_keys().collect())
    }

    async fn snapshot(&self, refresh: bool) -> Result<DailySnapshot> {
        if !refresh {
            if let Some(snapshot) = self.cache.read().await.as_ref() {
                return Ok(snapshot.clone());
            }
        }

        let mut guard = self.cache.write().await;
        if !refresh {
            // Another task may have filled the cache while we waited.
            if let Some(snapshot) = guard.as_ref() {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = self.fetch_snapshot().await?;
        *guard = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn fetch_snapshot(&self) -> Result<DailySnapshot> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once().await {
                Ok(snapshot) => {
                    tracing::info!(
                        date = %snapshot.date,
                        currencies = snapshot.rates.len(),
                        "fetched daily reference rates"
                    );
                    return Ok(snapshot);
                }
                Err(err) => {
                    if attempt >= FETCH_RETRIES {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "daily feed fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn fetch_once(&self) -> Result<DailySnapshot> {
        let res = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("daily feed request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read daily feed response")?;
        if !status.is_success() {
            anyhow::bail!("daily feed HTTP {status}");
        }

        parse_daily_xml(&text)
    }
}

// The feed nests three levels of <Cube>: a bare wrapper, one carrying
// the publication date in a `time` attribute, and one per currency
// carrying `currency` and `rate` attributes.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Cube")]
    cube: CubeWrapper,
}

#[derive(Debug, Deserialize)]
struct CubeWrapper {
    #[serde(rename = "Cube")]
    day: CubeDay,
}

#[derive(Debug, Deserialize)]
struct CubeDay {
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "Cube", default)]
    rates: Vec<CubeRate>,
}

#[derive(Debug, Deserialize)]
struct CubeRate {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@rate")]
    rate: String,
}

pub(crate) fn parse_daily_xml(text: &str) -> Result<DailySnapshot> {
    let envelope: Envelope =
        quick_xml::de::from_str(text).context("unexpected daily feed XML shape")?;
    let day = envelope.cube.day;

    let date = NaiveDate::parse_from_str(&day.time, "%Y-%m-%d")
        .with_context(|| format!("unparsable publication date {:?}", day.time))?;

    let mut rates = RateTable::new();
    // The feed never lists the reference currency's self-rate.
    rates.insert(REFERENCE_CURRENCY.to_string(), 1.0);
    for cube in day.rates {
        let value: f64 = cube
            .rate
            .trim()
            .parse()
            .with_context(|| format!("unparsable rate {:?} for {}", cube.rate, cube.currency))?;
        rates.insert(cube.currency, value);
    }

    Ok(DailySnapshot { date, rates })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gesmes:Envelope xmlns:gesmes="http://www.gesmes.org/xml/2002-08-01" xmlns="http://www.ecb.int/vocabulary/2002-08-01/eurofxref">
  <gesmes:subject>Reference rates</gesmes:subject>
  <gesmes:Sender><gesmes:name>European Central Bank</gesmes:name></gesmes:Sender>
  <Cube>
    <Cube time="2024-01-02">
      <Cube currency="USD" rate="1.0956"/>
      <Cube currency="JPY" rate="155.5"/>
      <Cube currency="GBP" rate="0.86705"/>
    </Cube>
  </Cube>
</gesmes:Envelope>"#;

    #[test]
    fn parses_date_rates_and_synthesized_self_entry() {
        let snapshot = parse_daily_xml(SAMPLE).unwrap();
        assert_eq!(
            snapshot.date,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        assert_eq!(snapshot.rates.len(), 4);
        assert_eq!(snapshot.rates.get("EUR").copied(), Some(1.0));
        assert_eq!(snapshot.rates.get("USD").copied(), Some(1.0956));
        assert_eq!(snapshot.rates.get("JPY").copied(), Some(155.5));
    }

    #[test]
    fn currency_set_comes_out_sorted() {
        let snapshot = parse_daily_xml(SAMPLE).unwrap();
        let codes: Vec<&str> = snapshot.rates.keys().map(String::as_str).collect();
        assert_eq!(codes, vec!["EUR", "GBP", "JPY", "USD"]);
    }

    #[test]
    fn rejects_an_unparsable_rate() {
        let broken = SAMPLE.replace("1.0956", "n/a");
        assert!(parse_daily_xml(&broken).is_err());
    }

    #[test]
    fn rejects_a_missing_publication_date() {
        let broken = SAMPLE.replace(" time=\"2024-01-02\"", "");
        assert!(parse_daily_xml(&broken).is_err());
    }
}
