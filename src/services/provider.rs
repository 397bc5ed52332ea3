//! HTTP client for the upstream balance provider.
//!
//! One endpoint matters here: `GET /{user_id}/balances?start_date=..&end_date=..`
//! returning the per-account balance windows with derived statistics. A 429
//! triggers a bounded exponential backoff retry loop local to the calling
//! task; any other non-200 is a recoverable per-user failure.

use crate::constants::{
    PROVIDER_BACKOFF_BASE_SECS, PROVIDER_BACKOFF_CAP_SECS, PROVIDER_MAX_RETRIES,
    PROVIDER_REQUEST_TIMEOUT_SECS,
};
use crate::error::{Error, Result};
use crate::models::AccountBalanceSeries;
use crate::services::window::BalanceWindow;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    accounts_balances: Vec<serde_json::Value>,
}

/// Fetched payload split into well-formed accounts and per-account shape
/// rejections, so one malformed account never discards its siblings.
#[derive(Debug, Default)]
pub struct FetchedBalances {
    pub accounts: Vec<AccountBalanceSeries>,
    pub rejected: Vec<Error>,
}

pub struct BalanceProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl BalanceProvider {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Invalid provider base_url: must start with http:// or https://, got: '{}'",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            api_key,
            client,
            max_retries: PROVIDER_MAX_RETRIES,
        })
    }

    /// Build a provider client from `PROVIDER_BASE_URL` / `PROVIDER_API_KEY`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PROVIDER_BASE_URL")
            .map_err(|_| Error::Config("PROVIDER_BASE_URL is not set".to_string()))?;
        let api_key = std::env::var("PROVIDER_API_KEY")
            .map_err(|_| Error::Config("PROVIDER_API_KEY is not set".to_string()))?;
        Self::new(base_url, api_key)
    }

    /// Fetch one user's balance windows for the given date range.
    ///
    /// Retries the same request on 429 with doubling backoff (1s base, jitter,
    /// capped) up to `max_retries` attempts, then reports a terminal error.
    pub async fn fetch_balances(
        &self,
        user_id: &str,
        window: &BalanceWindow,
    ) -> Result<FetchedBalances> {
        let url = format!("{}/{}/balances", self.base_url, user_id);
        let mut last_error = Error::RateLimited(self.max_retries);

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = PROVIDER_BACKOFF_BASE_SECS * 2.0_f64.powi(attempt as i32 - 1)
                    + rand::random::<f64>();
                let delay = Duration::from_secs_f64(delay.min(PROVIDER_BACKOFF_CAP_SECS));
                warn!(
                    user_id = %user_id,
                    attempt = attempt + 1,
                    max_attempts = self.max_retries,
                    wait_secs = delay.as_secs_f64(),
                    "Provider retry backoff"
                );
                sleep(delay).await;
            }

            debug!(
                user_id = %user_id,
                start_date = %window.start_str(),
                end_date = %window.end_str(),
                "Requesting balance window"
            );

            let response = match self
                .client
                .get(&url)
                .header("x-api-key", &self.api_key)
                .query(&[
                    ("start_date", window.start_str()),
                    ("end_date", window.end_str()),
                ])
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    // Transient transport failures retry on the same schedule
                    last_error = Error::Network(format!("Provider request failed: {}", e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                last_error = Error::RateLimited(attempt + 1);
                continue;
            }
            if !status.is_success() {
                return Err(Error::Provider {
                    user_id: user_id.to_string(),
                    status: status.as_u16(),
                });
            }

            let body = response
                .text()
                .await
                .map_err(|e| Error::Network(format!("Failed to read provider response: {}", e)))?;

            return parse_payload(&body);
        }

        Err(last_error)
    }
}

/// Parse the provider payload, isolating per-account shape failures
pub fn parse_payload(body: &str) -> Result<FetchedBalances> {
    let response: BalancesResponse = serde_json::from_str(body)
        .map_err(|e| Error::Parse(format!("Malformed provider response: {}", e)))?;

    let mut fetched = FetchedBalances::default();
    for value in response.accounts_balances {
        match serde_json::from_value::<AccountBalanceSeries>(value) {
            Ok(series) => fetched.accounts.push(series),
            Err(e) => fetched.rejected.push(Error::MalformedSeries {
                account_id: "<unparseable>".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    Ok(fetched)
}
