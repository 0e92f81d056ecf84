//! USD/CNY rate adapter, used to convert Shanghai prices to USD/oz.

use std::time::Duration;

use serde::Deserialize;

use crate::adapter::{FetchError, SourceAdapter, SourceId, SourceValue};

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: std::collections::HashMap<String, f64>,
}

pub struct FxRateAdapter {
    http: reqwest::Client,
    url: String,
    currency: String,
    ttl: Duration,
    timeout: Duration,
}

impl FxRateAdapter {
    pub fn new(http: reqwest::Client, url: String, ttl: Duration, timeout: Duration) -> Self {
        Self {
            http,
            url,
            currency: "CNY".to_string(),
            ttl,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for FxRateAdapter {
    fn id(&self) -> SourceId {
        SourceId::UsdCny
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
                "FX endpoint returned HTTP {}",
                response.status()
            )));
        }
        let parsed: RatesResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("FX body: {e}")))?;
        let rate = parsed
            .rates
            .get(&self.currency)
            .copied()
            .filter(|r| *r > 0.0)
            .ok_or_else(|| FetchError::Parse(format!("no {} rate in FX body", self.currency)))?;
        tracing::debug!(rate, "USD/CNY rate fetched");
        Ok(SourceValue::Fx(rate))
    }
}
