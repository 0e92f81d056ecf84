//! Source adapter trait and shared error types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sterling_core::report::{DeliveryRow, FuturesQuote, Inventory, Quote, ShfeQuote, TrustHoldings};

/// Errors that can occur while fetching from an external source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// The closed set of external sources the aggregator knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceId {
    SpotSilver,
    SpotGold,
    ComexFutures,
    ShfeFutures,
    SlvPrice,
    GldPrice,
    SlvHoldings,
    GldHoldings,
    ComexInventory,
    DeliveryBulletin,
    UsdCny,
    /// Budgeted spot API, proxy-paired with the quote-page scrape.
    MetalsApiSilver,
    MetalsApiGold,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::SpotSilver => "spot_silver",
            SourceId::SpotGold => "spot_gold",
            SourceId::ComexFutures => "comex_futures",
            SourceId::ShfeFutures => "shfe_futures",
            SourceId::SlvPrice => "slv_price",
            SourceId::GldPrice => "gld_price",
            SourceId::SlvHoldings => "slv_holdings",
            SourceId::GldHoldings => "gld_holdings",
            SourceId::ComexInventory => "comex_inventory",
            SourceId::DeliveryBulletin => "delivery_bulletin",
            SourceId::UsdCny => "usd_cny",
            SourceId::MetalsApiSilver => "metals_api_silver",
            SourceId::MetalsApiGold => "metals_api_gold",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged payload, one variant per payload family a source can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceValue {
    Quote(Quote),
    Futures(FuturesQuote),
    Shfe(ShfeQuote),
    Holdings(TrustHoldings),
    Inventory(Inventory),
    Deliveries(Vec<DeliveryRow>),
    Fx(f64),
}

impl SourceValue {
    pub fn as_quote(&self) -> Option<&Quote> {
        match self {
            SourceValue::Quote(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_futures(&self) -> Option<&FuturesQuote> {
        match self {
            SourceValue::Futures(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_shfe(&self) -> Option<&ShfeQuote> {
        match self {
            SourceValue::Shfe(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_holdings(&self) -> Option<&TrustHoldings> {
        match self {
            SourceValue::Holdings(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_inventory(&self) -> Option<&Inventory> {
        match self {
            SourceValue::Inventory(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_deliveries(&self) -> Option<&[DeliveryRow]> {
        match self {
            SourceValue::Deliveries(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_fx(&self) -> Option<f64> {
        match self {
            SourceValue::Fx(r) => Some(*r),
            _ => None,
        }
    }
}

/// One external data provider.
///
/// Adapters are cheap handles over a shared HTTP client; the aggregator
/// composes them into per-field fallback chains and the cache store decides
/// when `fetch` actually runs.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// How long a fetched value counts as fresh.
    fn ttl(&self) -> Duration;

    /// Whether fetches consume the rate budget.
    fn rate_budgeted(&self) -> bool {
        false
    }

    async fn fetch(&self) -> Result<SourceValue, FetchError>;
}
