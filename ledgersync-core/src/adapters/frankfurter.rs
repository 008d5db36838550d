//! Frankfurter exchange-rate client
//!
//! `GET {source_url}/latest?from=USD` answers
//! `{ "amount": 1.0, "base": "USD", "date": "2024-03-28", "rates": { "EUR": 0.92, ... } }`

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::config::RateSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{ExchangeRates, RateOrigin};
use crate::ports::RateSource;

#[derive(Debug, Deserialize)]
struct LatestResponse {
    base: String,
    date: String,
    rates: BTreeMap<String, serde_json::Number>,
}

/// Parse a `/latest` body into a live snapshot
pub fn parse_latest(body: &str) -> Result<ExchangeRates> {
    let response: LatestResponse = serde_json::from_str(body)
        .map_err(|e| Error::RatesUnavailable(format!("Malformed rate response: {}", e)))?;

    let date = NaiveDate::parse_from_str(&response.date, "%Y-%m-%d").map_err(|_| {
        Error::RatesUnavailable(format!("Malformed rate date: {}", response.date))
    })?;

    let rates = response
        .rates
        .into_iter()
        .filter_map(|(code, rate)| rate.to_string().parse::<Decimal>().ok().map(|r| (code, r)));

    Ok(ExchangeRates::new(response.base, date, rates, RateOrigin::Live))
}

/// HTTP client for the Frankfurter API
#[derive(Debug, Clone)]
pub struct FrankfurterClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl FrankfurterClient {
    pub fn new(settings: &RateSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.source_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl RateSource for FrankfurterClient {
    fn name(&self) -> &str {
        "frankfurter"
    }

    async fn fetch_latest(&self, base: &str) -> Result<ExchangeRates> {
        let url = format!("{}/latest", self.base_url);
        debug!(url = %url, base = %base, "fetching exchange rates");

        let response = self
            .client
            .get(&url)
            .query(&[("from", base.to_ascii_uppercase())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::RatesUnavailable(format!(
                        "Rate source timed out after {} seconds",
                        self.timeout.as_secs()
                    ))
                } else {
                    Error::RatesUnavailable(format!("Rate source unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RatesUnavailable(format!(
                "Rate source answered HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::RatesUnavailable(format!("Failed to read rate response: {}", e)))?;
        parse_latest(&body)
    }
}
