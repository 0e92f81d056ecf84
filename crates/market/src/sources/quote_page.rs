//! Quote-page scrape adapter.
//!
//! The quote site embeds the interesting numbers as JSON fragments in the
//! page body, in two encodings (plain and HTML-entity escaped). Extraction
//! is field-by-field regex over the raw body; a page without a last price is
//! a parse failure, everything else is optional.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use sterling_core::report::{FuturesQuote, Quote, ShfeQuote};

use crate::adapter::{FetchError, SourceAdapter, SourceId, SourceValue};

static LAST_PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""lastPrice":"?([0-9,.]+)"?"#).expect("valid lastPrice regex"));
static PCT_CHANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""percentChange":"?(-?[0-9.]+)"?"#).expect("valid percentChange regex"));
static PREV_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""previousClose":"?([0-9,.]+)"?"#).expect("valid previousClose regex"));
static VOLUME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""volume":"?([0-9,]+)"?"#).expect("valid volume regex"));
static OPEN_INTEREST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""openInterest":"?([0-9,]+)"?"#).expect("valid openInterest regex"));
// Escaped fallbacks: some fields only appear inside the raw data blob.
static RAW_VOLUME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&quot;volume&quot;:([0-9]+)").expect("valid raw volume regex"));
static RAW_OI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&quot;openInterest&quot;:([0-9]+)").expect("valid raw OI regex"));

fn capture_f64(re: &Regex, body: &str) -> Option<f64> {
    re.captures(body)
        .and_then(|c| c[1].replace(',', "").parse().ok())
}

fn capture_u64(re: &Regex, body: &str) -> Option<u64> {
    re.captures(body)
        .and_then(|c| c[1].replace(',', "").parse().ok())
}

fn parse_volume(body: &str) -> Option<u64> {
    capture_u64(&VOLUME_RE, body).or_else(|| capture_u64(&RAW_VOLUME_RE, body))
}

fn parse_open_interest(body: &str) -> Option<u64> {
    capture_u64(&OPEN_INTEREST_RE, body).or_else(|| capture_u64(&RAW_OI_RE, body))
}

/// Which payload family the scraped page represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    /// Spot or ETF price in USD.
    Spot,
    /// Futures contract: price plus open interest and volume.
    Futures,
    /// Shanghai futures: price in CNY/kg plus open interest and volume.
    Shfe,
}

pub struct QuotePageAdapter {
    id: SourceId,
    kind: QuoteKind,
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    timeout: Duration,
}

impl QuotePageAdapter {
    pub fn new(
        id: SourceId,
        kind: QuoteKind,
        http: reqwest::Client,
        url: String,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            kind,
            http,
            url,
            ttl,
            timeout,
        }
    }

    fn parse_body(&self, body: &str) -> Result<SourceValue, FetchError> {
        parse_quote_body(self.kind, body)
    }
}

/// Parse one scraped page body into the adapter's payload family.
pub fn parse_quote_body(kind: QuoteKind, body: &str) -> Result<SourceValue, FetchError> {
    let price = capture_f64(&LAST_PRICE_RE, body)
        .ok_or_else(|| FetchError::Parse("no lastPrice field in page body".into()))?;
    let change_pct = capture_f64(&PCT_CHANGE_RE, body);

    Ok(match kind {
        QuoteKind::Spot => SourceValue::Quote(Quote {
            price,
            change_pct,
            previous_close: capture_f64(&PREV_CLOSE_RE, body),
        }),
        QuoteKind::Futures => SourceValue::Futures(FuturesQuote {
            price,
            previous_close: capture_f64(&PREV_CLOSE_RE, body),
            change_pct,
            volume: parse_volume(body),
            open_interest: parse_open_interest(body),
        }),
        QuoteKind::Shfe => SourceValue::Shfe(ShfeQuote {
            price_cny_kg: price,
            change_pct,
            volume: parse_volume(body),
            open_interest: parse_open_interest(body),
        }),
    })
}

#[async_trait::async_trait]
impl SourceAdapter for QuotePageAdapter {
    fn id(&self) -> SourceId {
        self.id
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
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!(
                "quote page returned HTTP {status}"
            )));
        }
        let body = response.text().await?;
        tracing::debug!(source = %self.id, bytes = body.len(), "quote page fetched");
        self.parse_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUTURES_BODY: &str = concat!(
        r#"{"lastPrice":"51.25","percentChange":"-1.2","previousClose":"51.87","#,
        r#""volume":"12,345"} &quot;openInterest&quot;:98765"#
    );

    #[test]
    fn futures_body_parses_all_fields() {
        let value = parse_quote_body(QuoteKind::Futures, FUTURES_BODY).unwrap();
        let q = value.as_futures().unwrap();
        assert_eq!(q.price, 51.25);
        assert_eq!(q.change_pct, Some(-1.2));
        assert_eq!(q.previous_close, Some(51.87));
        assert_eq!(q.volume, Some(12_345));
        // Open interest only present in the escaped raw blob.
        assert_eq!(q.open_interest, Some(98_765));
    }

    #[test]
    fn spot_body_parses_without_futures_fields() {
        let body = r#"{"lastPrice":49.98,"percentChange":0.4}"#;
        let value = parse_quote_body(QuoteKind::Spot, body).unwrap();
        let q = value.as_quote().unwrap();
        assert_eq!(q.price, 49.98);
        assert_eq!(q.change_pct, Some(0.4));
        assert_eq!(q.previous_close, None);
    }

    #[test]
    fn shfe_body_keeps_cny_price() {
        let body = r#""lastPrice":"9,150" "percentChange":"0.85" "volume":"44,000""#;
        let value = parse_quote_body(QuoteKind::Shfe, body).unwrap();
        let q = value.as_shfe().unwrap();
        assert_eq!(q.price_cny_kg, 9150.0);
        assert_eq!(q.volume, Some(44_000));
    }

    #[test]
    fn missing_price_is_parse_error() {
        let err = parse_quote_body(QuoteKind::Spot, "<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
