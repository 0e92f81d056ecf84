//! Spot-price JSON API adapter — the rate-budgeted source.
//!
//! The free tier meters requests per month, so this adapter declares
//! `rate_budgeted`; the aggregator checks the budget guard before letting a
//! fetch through and routes to the quote-page proxy on refusal.

use std::time::Duration;

use serde::Deserialize;

use crate::adapter::{FetchError, SourceAdapter, SourceId, SourceValue};
use sterling_core::report::Quote;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    metals: Metals,
}

#[derive(Debug, Deserialize)]
struct Metals {
    silver: Option<f64>,
    gold: Option<f64>,
}

pub struct MetalsApiAdapter {
    id: SourceId,
    metal: &'static str,
    http: reqwest::Client,
    url: String,
    api_key: String,
    ttl: Duration,
    timeout: Duration,
}

impl MetalsApiAdapter {
    pub fn silver(
        http: reqwest::Client,
        url: String,
        api_key: String,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            id: SourceId::MetalsApiSilver,
            metal: "silver",
            http,
            url,
            api_key,
            ttl,
            timeout,
        }
    }

    pub fn gold(
        http: reqwest::Client,
        url: String,
        api_key: String,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            id: SourceId::MetalsApiGold,
            metal: "gold",
            http,
            url,
            api_key,
            ttl,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for MetalsApiAdapter {
    fn id(&self) -> SourceId {
        self.id
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn rate_budgeted(&self) -> bool {
        true
    }

    async fn fetch(&self) -> Result<SourceValue, FetchError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("currency", "USD"),
                ("unit", "toz"),
            ])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited("metals API returned HTTP 429".into()));
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!(
                "metals API returned HTTP {status}"
            )));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("metals API body: {e}")))?;
        let price = match self.metal {
            "gold" => parsed.metals.gold,
            _ => parsed.metals.silver,
        }
        .ok_or_else(|| FetchError::Parse(format!("metals API has no {} price", self.metal)))?;

        tracing::debug!(source = %self.id, price, "metals API price fetched");
        Ok(SourceValue::Quote(Quote {
            price,
            change_pct: None,
            previous_close: None,
        }))
    }
}
