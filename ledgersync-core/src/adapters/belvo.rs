//! Belvo API client
//!
//! Pulls transactions from the Belvo Open-Finance aggregator, one page at a
//! time. Listing endpoint:
//!
//! `GET /api/transactions/?link=<link_id>&page_size=N[&value_date__gte=..][&id__in=..]`
//!
//! which answers `{ "count": N, "next": <url|null>, "results": [...] }`.
//!
//! API Documentation: https://developers.belvo.com/reference

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use crate::config::ProviderSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{mask_link_id, FlowDirection, RawStatus, RawTransaction};
use crate::ports::{PageCursor, TransactionPage, TransactionSource};

// =============================================================================
// API Response Models
// =============================================================================

/// Paginated list response
#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    #[allow(dead_code)]
    count: Option<u64>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<JsonValue>,
}

/// Why a record was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDefect {
    MissingField(&'static str),
    InvalidAmount(String),
    NonPositiveAmount,
    InvalidDate(String),
}

impl std::fmt::Display for RecordDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordDefect::MissingField(field) => write!(f, "missing field '{}'", field),
            RecordDefect::InvalidAmount(raw) => write!(f, "invalid amount '{}'", raw),
            RecordDefect::NonPositiveAmount => write!(f, "amount must be positive"),
            RecordDefect::InvalidDate(raw) => write!(f, "invalid value_date '{}'", raw),
        }
    }
}

/// Validate one Belvo transaction object and map it to a `RawTransaction`
///
/// Requires id, amount, value_date and type. Belvo reports amounts unsigned
/// with the direction in `type`, so the amount must be positive.
pub fn parse_transaction(value: &JsonValue) -> std::result::Result<RawTransaction, RecordDefect> {
    let id = match value.get("id") {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => return Err(RecordDefect::MissingField("id")),
    };

    let amount = match value.get("amount") {
        Some(JsonValue::Number(n)) => n
            .to_string()
            .parse::<Decimal>()
            .map_err(|_| RecordDefect::InvalidAmount(n.to_string()))?,
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<Decimal>()
            .map_err(|_| RecordDefect::InvalidAmount(s.clone()))?,
        _ => return Err(RecordDefect::MissingField("amount")),
    };
    if amount <= Decimal::ZERO {
        return Err(RecordDefect::NonPositiveAmount);
    }

    let value_date = match value.get("value_date").and_then(JsonValue::as_str) {
        Some(raw) => NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d")
            .map_err(|_| RecordDefect::InvalidDate(raw.to_string()))?,
        None => return Err(RecordDefect::MissingField("value_date")),
    };

    let flow = match value.get("type").and_then(JsonValue::as_str) {
        Some(raw) if !raw.trim().is_empty() => FlowDirection::parse(raw.trim()),
        _ => return Err(RecordDefect::MissingField("type")),
    };

    let status = value
        .get("status")
        .and_then(JsonValue::as_str)
        .map(RawStatus::parse)
        .unwrap_or(RawStatus::Processed);

    // account and merchant come either as objects or as bare strings
    let account_ref = match value.get("account") {
        Some(JsonValue::Object(obj)) => obj.get("id").and_then(json_string),
        Some(other) => json_string(other),
        None => None,
    };
    let merchant = match value.get("merchant") {
        Some(JsonValue::Object(obj)) => obj.get("name").and_then(json_string),
        Some(other) => json_string(other),
        None => None,
    };

    Ok(RawTransaction {
        id,
        account_ref,
        amount,
        currency: value
            .get("currency")
            .and_then(json_string)
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_default(),
        value_date,
        description: value.get("description").and_then(json_string),
        category: value.get("category").and_then(json_string),
        subcategory: value.get("subcategory").and_then(json_string),
        merchant,
        flow,
        status,
    })
}

fn json_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Belvo HTTP Client
// =============================================================================

/// Belvo API client
#[derive(Debug, Clone)]
pub struct BelvoClient {
    client: Client,
    base_url: Url,
    secret_id: Option<String>,
    secret_password: Option<String>,
    page_size: u32,
    timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl BelvoClient {
    /// Create a client from provider settings
    ///
    /// Missing credentials are accepted here and reported on the first call,
    /// so commands that never reach the aggregator still work.
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let base_url = Url::parse(settings.base_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid Belvo base URL: {}", e)))?;

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            secret_id: settings.secret_id.clone().filter(|s| !s.is_empty()),
            secret_password: settings.secret_password.clone().filter(|s| !s.is_empty()),
            page_size: settings.page_size,
            timeout: settings.request_timeout(),
            max_retries: settings.max_retries,
            retry_backoff: settings.retry_backoff(),
        })
    }

    /// URL of the first page of a listing
    fn listing_url(&self, link_id: &str, cursor: &PageCursor) -> Result<Url> {
        let mut url = self
            .base_url
            .join("/api/transactions/")
            .map_err(|e| Error::Config(format!("Invalid Belvo base URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("link", link_id);
            query.append_pair("page_size", &self.page_size.to_string());
            match cursor {
                PageCursor::Start { date_from, date_to } => {
                    if let Some(from) = date_from {
                        query.append_pair("value_date__gte", &from.to_string());
                    }
                    if let Some(to) = date_to {
                        query.append_pair("value_date__lte", &to.to_string());
                    }
                }
                PageCursor::Ids(ids) => {
                    query.append_pair("id__in", &ids.join(","));
                }
                PageCursor::Next(_) => {}
            }
        }
        Ok(url)
    }

    fn page_url(&self, link_id: &str, cursor: &PageCursor) -> Result<Url> {
        match cursor {
            // `next` is normally absolute; a relative one resolves against the base
            PageCursor::Next(next) => self
                .base_url
                .join(next)
                .map_err(|e| Error::provider(format!("Invalid next page URL '{}': {}", next, e))),
            _ => self.listing_url(link_id, cursor),
        }
    }

    /// GET a page, retrying transient failures with exponential backoff
    async fn get_page(&self, url: &Url) -> Result<PageResponse> {
        let mut attempt = 0;
        loop {
            match self.get_page_once(url).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_backoff * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Belvo request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_page_once(&self, url: &Url) -> Result<PageResponse> {
        let (secret_id, secret_password) = match (&self.secret_id, &self.secret_password) {
            (Some(id), Some(password)) => (id, password),
            _ => {
                return Err(Error::Config(
                    "Belvo credentials are not configured (secretId / secretPassword)".into(),
                ))
            }
        };

        let response = self
            .client
            .get(url.clone())
            .basic_auth(secret_id, Some(secret_password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let response = self.check_response_status(response)?;

        response.json::<PageResponse>().await.map_err(|e| Error::ProviderUnavailable {
            status: Some(StatusCode::OK.as_u16()),
            message: format!("Failed to parse Belvo transactions response: {}", e),
        })
    }

    /// Map request errors to readable messages
    fn map_request_error(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::provider(format!(
                "Connection timed out after {} seconds",
                self.timeout.as_secs()
            ))
        } else if error.is_connect() {
            Error::provider("Unable to connect to Belvo servers")
        } else {
            Error::provider(format!("Belvo request failed: {}", error))
        }
    }

    /// Check response status and return appropriate errors
    fn check_response_status(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = status.as_u16();
        let message = match code {
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                return Err(Error::RateLimited { retry_after });
            }
            401 => "Belvo authentication failed. Check the secret id and password.".to_string(),
            403 => "Belvo access denied for this link.".to_string(),
            404 => "Belvo link or resource not found.".to_string(),
            408 => "Belvo request timed out.".to_string(),
            _ => format!("Belvo API error: HTTP {}", code),
        };
        Err(Error::ProviderUnavailable {
            status: Some(code),
            message,
        })
    }
}

#[async_trait]
impl TransactionSource for BelvoClient {
    fn name(&self) -> &str {
        "belvo"
    }

    async fn fetch_page(&self, link_id: &str, cursor: &PageCursor) -> Result<TransactionPage> {
        let url = self.page_url(link_id, cursor)?;
        debug!(link_id = %mask_link_id(link_id), cursor = ?cursor_kind(cursor), "fetching Belvo page");

        let response = self.get_page(&url).await?;

        let mut page = TransactionPage {
            transactions: Vec::with_capacity(response.results.len()),
            next: response.next.filter(|n| !n.trim().is_empty()),
            invalid: 0,
        };
        for record in &response.results {
            match parse_transaction(record) {
                Ok(tx) => page.transactions.push(tx),
                Err(defect) => {
                    page.invalid += 1;
                    warn!(
                        link_id = %mask_link_id(link_id),
                        transaction_id = record.get("id").and_then(json_string).as_deref().unwrap_or("<none>"),
                        defect = %defect,
                        "skipping invalid Belvo transaction"
                    );
                }
            }
        }
        Ok(page)
    }
}

fn cursor_kind(cursor: &PageCursor) -> &'static str {
    match cursor {
        PageCursor::Start { .. } => "start",
        PageCursor::Ids(_) => "ids",
        PageCursor::Next(_) => "next",
    }
}
