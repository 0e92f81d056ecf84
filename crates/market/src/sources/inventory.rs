//! Exchange warehouse stocks report adapter.
//!
//! The stocks report is a delimited table with one row per depository and
//! two summary rows, `TOTAL REGISTERED` and `TOTAL ELIGIBLE`. Columns of
//! interest: previous total (index 2), adjustment (index 6), total today
//! (index 7).

use std::time::Duration;

use sterling_core::report::Inventory;

use crate::adapter::{FetchError, SourceAdapter, SourceId, SourceValue};

const PREV_TOTAL_COL: usize = 2;
const ADJUSTMENT_COL: usize = 6;
const TOTAL_TODAY_COL: usize = 7;

pub struct InventoryReportAdapter {
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    timeout: Duration,
}

impl InventoryReportAdapter {
    pub fn new(http: reqwest::Client, url: String, ttl: Duration, timeout: Duration) -> Self {
        Self {
            http,
            url,
            ttl,
            timeout,
        }
    }
}

fn numeric(record: &csv::StringRecord, col: usize) -> Option<f64> {
    record.get(col)?.replace(',', "").trim().parse().ok()
}

pub fn parse_stocks_report(body: &str) -> Result<Inventory, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut registered: Option<(f64, f64, f64)> = None; // (today, prev, adjustment)
    let mut eligible: Option<(f64, f64, f64)> = None;

    for record in reader.records() {
        let record = record.map_err(|e| FetchError::Parse(format!("stocks report row: {e}")))?;
        let label = record.get(0).unwrap_or("").trim();
        let row = (
            numeric(&record, TOTAL_TODAY_COL),
            numeric(&record, PREV_TOTAL_COL),
            numeric(&record, ADJUSTMENT_COL),
        );
        match label {
            "TOTAL REGISTERED" => {
                if let (Some(today), Some(prev), Some(adj)) = row {
                    registered = Some((today, prev, adj));
                }
            }
            "TOTAL ELIGIBLE" => {
                if let (Some(today), Some(prev), Some(adj)) = row {
                    eligible = Some((today, prev, adj));
                }
            }
            _ => {}
        }
    }

    match (registered, eligible) {
        (Some((reg, reg_prev, reg_adj)), Some((elig, elig_prev, elig_adj))) => Ok(Inventory {
            registered: reg,
            eligible: elig,
            registered_prev: reg_prev,
            eligible_prev: elig_prev,
            registered_adjustment: reg_adj,
            eligible_adjustment: elig_adj,
        }),
        _ => Err(FetchError::Parse(
            "stocks report missing TOTAL REGISTERED/ELIGIBLE rows".into(),
        )),
    }
}

#[async_trait::async_trait]
impl SourceAdapter for InventoryReportAdapter {
    fn id(&self) -> SourceId {
        SourceId::ComexInventory
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
                "stocks report returned HTTP {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let inventory = parse_stocks_report(&body)?;
        tracing::debug!(
            registered = inventory.registered,
            eligible = inventory.eligible,
            "warehouse stocks fetched"
        );
        Ok(SourceValue::Inventory(inventory))
    }
}
