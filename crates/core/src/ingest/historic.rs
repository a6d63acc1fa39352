use crate::config::Settings;
use crate::domain::{RateTable, REFERENCE_CURRENCY};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

const CSV_FILENAME: &str = "eurofxref-hist.csv";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Every parsed day of the archive, keyed ascending by date.
pub type HistoricRates = BTreeMap<NaiveDate, RateTable>;

/// Downloads the full historical archive (a ZIP holding one CSV) and
/// parses it into day tables ready for the deduplicating write.
#[derive(Debug, Clone)]
pub struct HistoricArchiveClient {
    http: reqwest::Client,
    url: String,
}

impl HistoricArchiveClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build archive http client")?;

        Ok(Self {
            http,
            url: settings.historic_zip_url().to_string(),
        })
    }

    pub async fn fetch(&self) -> Result<HistoricRates> {
        let res = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("historical archive request failed")?;

        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .context("failed to read historical archive bytes")?;
        if !status.is_success() {
            anyhow::bail!("historical archive HTTP {status}");
        }

        let bytes = bytes.to_vec();
        let days = tokio::task::spawn_blocking(move || unzip_and_parse(&bytes))
            .await
            .context("join archive parse task failed")??;

        tracing::info!(days = days.len(), "parsed historical archive");
        Ok(days)
    }
}

fn unzip_and_parse(zip_bytes: &[u8]) -> Result<HistoricRates> {
    let reader = std::io::Cursor::new(zip_bytes);
    let mut archive = zip::ZipArchive::new(reader).context("open zip archive failed")?;
    let mut entry = archive
        .by_name(CSV_FILENAME)
        .with_context(|| format!("archive entry {CSV_FILENAME} not found"))?;

    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .context("read archive entry failed")?;

    parse_historic_csv(&text)
}

/// Header row `Date,<CUR1>,...` gives the ordered currency codes; each
/// data row carries a `yyyy-MM-dd` date and one cell per code. A row
/// whose cell count disagrees with the header fails the whole parse:
/// silently skipping a day in a dated series would be invisible data
/// loss.
pub(crate) fn parse_historic_csv(text: &str) -> Result<HistoricRates> {
    let mut lines = text.lines();
    let header = split_row(lines.next().context("historical CSV is empty")?);
    anyhow::ensure!(header.len() >= 2, "historical CSV header has no currency columns");
    let currencies = &header[1..];

    let mut days = HistoricRates::new();
    for line in lines {
        let cells = split_row(line);
        if cells.is_empty() {
            continue;
        }
        anyhow::ensure!(
            cells.len() == currencies.len() + 1,
            "row starting {:?} has {} value cells, header lists {} currencies",
            cells[0],
            cells.len() - 1,
            currencies.len()
        );

        let date = NaiveDate::parse_from_str(cells[0], "%Y-%m-%d")
            .with_context(|| format!("unparsable row date {:?}", cells[0]))?;

        let mut table = RateTable::new();
        // The archive never lists the reference currency's self-rate.
        table.insert(REFERENCE_CURRENCY.to_string(), 1.0);
        for (currency, cell) in currencies.iter().zip(&cells[1..]) {
            table.insert((*currency).to_string(), parse_observation(cell));
        }
        days.insert(date, table);
    }

    Ok(days)
}

// The feed terminates every row with a trailing comma; drop trailing
// empty cells before the length check.
fn split_row(line: &str) -> Vec<&str> {
    let mut cells: Vec<&str> = line.trim_end_matches('\r').split(',').collect();
    while cells.last().is_some_and(|cell| cell.is_empty()) {
        cells.pop();
    }
    cells
}

// Non-numeric cells (blank or a placeholder such as "N/A") mean the
// feed published no observation that day; stored as 0.0, which every
// consumer treats as "no data".
fn parse_observation(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(0.0)
}
