//! ETF trust holdings adapters.
//!
//! Two shapes in the wild: the silver trust publishes ounces inline on its
//! product page, the gold trust publishes a CSV archive whose last row is
//! the current figure.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use sterling_core::report::TrustHoldings;

use crate::adapter::{FetchError, SourceAdapter, SourceId, SourceValue};

/// Ounces-in-trust figure as rendered on the product page, e.g.
/// `474,441,434.90`.
static OUNCES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{3},\d{3},\d{3}\.\d+)").expect("valid ounces regex"));

pub struct TrustHoldingsAdapter {
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    timeout: Duration,
}

impl TrustHoldingsAdapter {
    pub fn new(http: reqwest::Client, url: String, ttl: Duration, timeout: Duration) -> Self {
        Self {
            http,
            url,
            ttl,
            timeout,
        }
    }
}

pub fn parse_trust_page(body: &str) -> Result<TrustHoldings, FetchError> {
    let ounces = OUNCES_RE
        .captures(body)
        .and_then(|c| c[1].replace(',', "").parse::<f64>().ok())
        .ok_or_else(|| FetchError::Parse("no ounces-in-trust figure on page".into()))?;
    Ok(TrustHoldings::from_ounces(ounces))
}

#[async_trait::async_trait]
impl SourceAdapter for TrustHoldingsAdapter {
    fn id(&self) -> SourceId {
        SourceId::SlvHoldings
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceValue, FetchError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Unavailable(format!(
                "trust page returned HTTP {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let holdings = parse_trust_page(&body)?;
        tracing::debug!(ounces = holdings.ounces, "trust holdings fetched");
        Ok(SourceValue::Holdings(holdings))
    }
}

// ── Archive CSV ─────────────────────────────────────────────────────

pub struct HoldingsArchiveAdapter {
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    timeout: Duration,
}

impl HoldingsArchiveAdapter {
    pub fn new(http: reqwest::Client, url: String, ttl: Duration, timeout: Duration) -> Self {
        Self {
            http,
            url,
            ttl,
            timeout,
        }
    }
}

/// Last row of the archive CSV carries the current tonnes and ounces. Column
/// headers are matched by substring because the publisher pads them with an
/// as-of timestamp.
pub fn parse_archive_csv(body: &str) -> Result<TrustHoldings, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| FetchError::Parse(format!("archive CSV headers: {e}")))?
        .clone();
    let tonnes_col = headers
        .iter()
        .position(|h| h.contains("Tonnes in the Trust"))
        .ok_or_else(|| FetchError::Parse("archive CSV has no tonnes column".into()))?;
    let ounces_col = headers
        .iter()
        .position(|h| h.contains("Ounces in the Trust"))
        .ok_or_else(|| FetchError::Parse("archive CSV has no ounces column".into()))?;

    let mut last: Option<TrustHoldings> = None;
    for record in reader.records() {
        let record = record.map_err(|e| FetchError::Parse(format!("archive CSV row: {e}")))?;
        let parsed = record.get(tonnes_col).and_then(|t| {
            let tonnes: f64 = t.replace(',', "").parse().ok()?;
            let ounces: f64 = record.get(ounces_col)?.replace(',', "").parse().ok()?;
            Some(TrustHoldings { tonnes, ounces })
        });
        // Trailing notes rows don't parse; keep the last row that did.
        if let Some(holdings) = parsed {
            last = Some(holdings);
        }
    }
    last.ok_or_else(|| FetchError::Parse("archive CSV has no data rows".into()))
}

#[async_trait::async_trait]
impl SourceAdapter for HoldingsArchiveAdapter {
    fn id(&self) -> SourceId {
        SourceId::GldHoldings
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceValue, FetchError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Unavailable(format!(
                "holdings archive returned HTTP {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let holdings = parse_archive_csv(&body)?;
        tracing::debug!(tonnes = holdings.tonnes, "archive holdings fetched");
        Ok(SourceValue::Holdings(holdings))
    }
}
