//! Delivery bulletin retrieval and section extraction.
//!
//! The exchange publishes a month-to-date issues-and-stops bulletin as a
//! paginated PDF. Each contract gets its own section headed by a
//! `CONTRACT: ...` line, followed by one row per intent date. Sections for
//! different contracts can mention each other's names in footnotes, so a
//! page only counts as a match when the header line *itself* carries the
//! target label; a body-text hit is rejected.

use std::time::Duration;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use sterling_core::report::DeliveryRow;

use crate::adapter::{FetchError, SourceAdapter, SourceId, SourceValue};

/// Errors from bulletin section extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no page carries a section header for '{0}'")]
    SectionNotFound(String),

    #[error("section for '{0}' has no parseable rows")]
    EmptySection(String),
}

impl From<ExtractError> for FetchError {
    fn from(err: ExtractError) -> Self {
        FetchError::Parse(err.to_string())
    }
}

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*CONTRACT:").expect("valid header regex"));

static SECTION_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(CONTRACT:|EXCHANGE:)").expect("valid section-end regex"));

static ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2})/(\d{1,2})/(\d{4})\s+([0-9,]+)\s+([0-9,]+)\s*$")
        .expect("valid row regex")
});

fn parse_grouped(raw: &str) -> Option<u64> {
    raw.replace(',', "").parse().ok()
}

/// Scan pages in document order for the section whose header line contains
/// `label` and parse the rows beneath it. The first validated page wins;
/// later pages are not scanned even if they would also validate.
pub fn extract_contract_rows(
    pages: &[String],
    label: &str,
) -> Result<Vec<DeliveryRow>, ExtractError> {
    for (page_idx, page) in pages.iter().enumerate() {
        let lines: Vec<&str> = page.lines().collect();
        let header_at = lines
            .iter()
            .position(|line| HEADER_RE.is_match(line) && line.contains(label));
        let Some(header_at) = header_at else {
            continue;
        };

        let mut rows = Vec::new();
        for line in &lines[header_at + 1..] {
            if line.trim().is_empty() || SECTION_END_RE.is_match(line) {
                break;
            }
            let Some(caps) = ROW_RE.captures(line) else {
                continue; // column headings, totals, wrapped text
            };
            let (month, day, year) = (
                caps[1].parse::<u32>().ok(),
                caps[2].parse::<u32>().ok(),
                caps[3].parse::<i32>().ok(),
            );
            let date = match (year, month, day) {
                (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
                _ => None,
            };
            let (Some(date), Some(daily), Some(cumulative)) =
                (date, parse_grouped(&caps[4]), parse_grouped(&caps[5]))
            else {
                tracing::warn!(page = page_idx, line = %line.trim(), "skipping malformed bulletin row");
                continue;
            };
            rows.push(DeliveryRow {
                intent_date: date,
                daily,
                cumulative,
                page: page_idx,
            });
        }

        if rows.is_empty() {
            return Err(ExtractError::EmptySection(label.to_string()));
        }
        rows.sort_by_key(|r| r.intent_date);
        return Ok(rows);
    }

    Err(ExtractError::SectionNotFound(label.to_string()))
}

// ── Retrieval ───────────────────────────────────────────────────────

/// Fetches the bulletin PDF and splits it into page texts.
pub struct BulletinClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl BulletinClient {
    pub fn new(http: reqwest::Client, url: String, timeout: Duration) -> Self {
        Self { http, url, timeout }
    }

    pub async fn fetch_pages(&self) -> Result<Vec<String>, FetchError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Unavailable(format!(
                "bulletin fetch returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().await?;

        // pdf-extract is CPU-bound; keep it off the async workers.
        let text = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| FetchError::Parse(format!("PDF extraction failed: {e}")))
        })
        .await
        .map_err(|e| FetchError::Unavailable(format!("extraction task failed: {e}")))??;

        Ok(split_pages(&text))
    }
}

/// Split extracted PDF text into pages on form-feed characters, the page
/// separator pdf-extract emits. Text without any form feed is one page.
pub fn split_pages(text: &str) -> Vec<String> {
    if text.contains('\x0C') {
        text.split('\x0C')
            .filter(|page| !page.trim().is_empty())
            .map(|page| page.to_string())
            .collect()
    } else {
        vec![text.to_string()]
    }
}

/// Source adapter over the bulletin: fetch pages, extract the configured
/// contract's rows.
pub struct BulletinAdapter {
    client: BulletinClient,
    label: String,
    ttl: Duration,
}

impl BulletinAdapter {
    pub fn new(client: BulletinClient, label: String, ttl: Duration) -> Self {
        Self { client, label, ttl }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for BulletinAdapter {
    fn id(&self) -> SourceId {
        SourceId::DeliveryBulletin
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn fetch(&self) -> Result<SourceValue, FetchError> {
        let pages = self.client.fetch_pages().await?;
        let rows = extract_contract_rows(&pages, &self.label)?;
        tracing::info!(
            rows = rows.len(),
            page = rows.first().map(|r| r.page).unwrap_or_default(),
            "bulletin section extracted"
        );
        Ok(SourceValue::Deliveries(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> String {
        text.to_string()
    }

    fn six_page_doc() -> Vec<String> {
        vec![
            page("EXCHANGE: COMEX\nDaily bulletin cover sheet\n"),
            page("CONTRACT: COMEX 100 GOLD FUTURES\n12/01/2025 10 10\n12/02/2025 5 15\n"),
            // Keyword appears in the body only; must be rejected.
            page(
                "CONTRACT: COMEX COPPER FUTURES\n12/01/2025 3 3\n\nNote: SILVER FUTURES \
                 deliveries are reported separately.\n",
            ),
            page(
                "CONTRACT: COMEX 5000 SILVER FUTURES\nINTENT DATE   DAILY   CUMULATIVE\n\
                 12/02/2025 120 120\n12/01/2025 80 80\n12/03/2025 1,450 1,570\n\nfootnote\n",
            ),
            page("CONTRACT: COMEX 5000 SILVER FUTURES\n12/04/2025 999 999\n"),
            page("EXCHANGE: NYMEX\n"),
        ]
    }

    #[test]
    fn body_mention_rejected_header_match_wins() {
        let rows = extract_contract_rows(&six_page_doc(), "SILVER FUTURES").unwrap();
        assert!(rows.iter().all(|r| r.page == 3), "rows must come from page 4 only");
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn first_validated_page_wins_over_later_sections() {
        // Page 4 (index 3) and page 5 (index 4) both validate; only the
        // first is used.
        let rows = extract_contract_rows(&six_page_doc(), "SILVER FUTURES").unwrap();
        assert!(rows.iter().all(|r| r.daily != 999));
    }

    #[test]
    fn rows_sorted_by_date_ascending() {
        let rows = extract_contract_rows(&six_page_doc(), "SILVER FUTURES").unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r.intent_date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[test]
    fn comma_grouped_numbers_parse() {
        let rows = extract_contract_rows(&six_page_doc(), "SILVER FUTURES").unwrap();
        let last = rows.last().unwrap();
        assert_eq!(last.daily, 1450);
        assert_eq!(last.cumulative, 1570);
    }

    #[test]
    fn missing_section_is_not_found() {
        let err = extract_contract_rows(&six_page_doc(), "PLATINUM FUTURES").unwrap_err();
        assert!(matches!(err, ExtractError::SectionNotFound(_)));
    }

    #[test]
    fn validated_section_without_rows_errors() {
        let pages = vec![page("CONTRACT: COMEX 5000 SILVER FUTURES\nTOTALS PENDING\n")];
        let err = extract_contract_rows(&pages, "SILVER FUTURES").unwrap_err();
        assert!(matches!(err, ExtractError::EmptySection(_)));
    }

    #[test]
    fn section_ends_at_next_marker() {
        let pages = vec![page(
            "CONTRACT: COMEX 5000 SILVER FUTURES\n12/01/2025 10 10\nEXCHANGE: NYMEX\n\
             12/02/2025 999 999\n",
        )];
        let rows = extract_contract_rows(&pages, "SILVER FUTURES").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].daily, 10);
    }

    #[test]
    fn split_pages_on_form_feed() {
        let pages = split_pages("first page\x0Csecond page\x0C  \x0Cthird");
        assert_eq!(pages.len(), 3);
        assert!(pages[1].contains("second"));
    }
}
