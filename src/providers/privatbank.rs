use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::config::PrivatBankProviderConfig;
use crate::core::rates::{DateKey, FetchError, RateDocument, RateProvider};

const ENDPOINT: &str = "/p24api/exchange_rates";

/// Daily archive rates from the PrivatBank public API.
pub struct PrivatBankProvider {
    base_url: String,
    timeout: Duration,
}

impl PrivatBankProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        PrivatBankProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &PrivatBankProviderConfig) -> Self {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn url_for(&self, date: &DateKey) -> String {
        format!("{}{}?date={}", self.base_url, ENDPOINT, date)
    }
}

#[async_trait]
impl RateProvider for PrivatBankProvider {
    #[instrument(name = "PrivatBankFetch", skip(self), fields(date = %date))]
    async fn fetch(&self, date: &DateKey) -> Result<RateDocument, FetchError> {
        let url = self.url_for(date);
        debug!("Requesting exchange rates from {}", url);

        // The client, and with it the connection pool, lives only for this call.
        let client = reqwest::Client::builder()
            .user_agent("xrates/0.1")
            .timeout(self.timeout)
            .build()
            .map_err(FetchError::Client)?;

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Network {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status { status, url });
        }

        let text = response
            .text()
            .await
            .map_err(|source| FetchError::Network {
                url: url.clone(),
                source,
            })?;

        let document: RateDocument =
            serde_json::from_str(&text).map_err(|source| FetchError::Decode {
                url: url.clone(),
                source,
            })?;

        debug!(
            entries = document.exchange_rate.len(),
            "Received exchange rate document"
        );
        Ok(document)
    }
}
