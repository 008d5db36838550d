//! Configuration management
//!
//! Settings live in `<data_dir>/settings.json` (camelCase):
//! ```json
//! {
//!   "provider": { "baseUrl": "https://sandbox.belvo.com", "pageSize": 100, ... },
//!   "rates": { "baseCurrency": "USD", "supportedCurrencies": ["USD", "EUR"], ... },
//!   "webhooks": { "processInBackground": false, "conflictRetries": 3, ... },
//!   "sync": { "incrementalOverlapDays": 7 },
//!   "logLevel": "info"
//! }
//! ```
//! Every field has a default; environment variables override the file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::result::{Error, Result};

pub const ENV_BELVO_BASE_URL: &str = "LEDGERSYNC_BELVO_BASE_URL";
pub const ENV_BELVO_SECRET_ID: &str = "LEDGERSYNC_BELVO_SECRET_ID";
pub const ENV_BELVO_SECRET_PASSWORD: &str = "LEDGERSYNC_BELVO_SECRET_PASSWORD";
pub const ENV_RATES_URL: &str = "LEDGERSYNC_RATES_URL";
pub const ENV_LOG: &str = "LEDGERSYNC_LOG";
pub const ENV_WEBHOOK_TOKEN: &str = "LEDGERSYNC_WEBHOOK_TOKEN";

/// Hard ceiling on pages followed in one listing
pub const MAX_PAGES_CEILING: usize = 100;

const SETTINGS_FILE: &str = "settings.json";

/// Aggregator API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub secret_id: Option<String>,
    pub secret_password: Option<String>,
    pub page_size: u32,
    pub max_pages: usize,
    pub request_timeout_secs: u64,
    /// Retries for connection failures and 5xx answers
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.belvo.com".to_string(),
            secret_id: None,
            secret_password: None,
            page_size: 100,
            max_pages: MAX_PAGES_CEILING,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl ProviderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Exchange-rate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateSettings {
    pub base_currency: String,
    /// Every ledger entry carries its amount in each of these
    pub supported_currencies: Vec<String>,
    pub source_url: String,
    pub request_timeout_secs: u64,
    /// Rates relative to `base_currency`, used when nothing else is available
    pub fallback: BTreeMap<String, Decimal>,
}

impl Default for RateSettings {
    fn default() -> Self {
        let fallback = [
            ("EUR", Decimal::new(92, 2)),
            ("GBP", Decimal::new(79, 2)),
            ("BRL", Decimal::new(505, 2)),
            ("MXN", Decimal::new(1710, 2)),
            ("CAD", Decimal::new(136, 2)),
        ]
        .into_iter()
        .map(|(code, rate)| (code.to_string(), rate))
        .collect();

        Self {
            base_currency: "USD".to_string(),
            supported_currencies: ["USD", "EUR", "GBP", "BRL", "MXN", "CAD"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            source_url: "https://api.frankfurter.app".to_string(),
            request_timeout_secs: 10,
            fallback,
        }
    }
}

/// Webhook intake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookSettings {
    /// Webhook types the engine acts on; others are acknowledged and ignored
    pub event_families: Vec<String>,
    /// Acknowledge first and run the handler on a spawned task
    pub process_in_background: bool,
    pub conflict_retries: u32,
    pub conflict_backoff_ms: u64,
    /// Expected Authorization header value; None accepts every request
    pub shared_token: Option<String>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            event_families: vec!["TRANSACTIONS".to_string(), "CONSENT".to_string()],
            process_in_background: false,
            conflict_retries: 3,
            conflict_backoff_ms: 2000,
            shared_token: None,
        }
    }
}

impl WebhookSettings {
    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Incremental syncs re-read this many days before the last seen transaction
    pub incremental_overlap_days: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            incremental_overlap_days: 7,
        }
    }
}

/// ledgersync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub provider: ProviderSettings,
    pub rates: RateSettings,
    pub webhooks: WebhookSettings,
    pub sync: SyncSettings,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            rates: RateSettings::default(),
            webhooks: WebhookSettings::default(),
            sync: SyncSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config from the data directory, then apply environment overrides
    ///
    /// A missing settings file yields defaults. An unreadable one is logged
    /// and ignored so a typo never blocks webhook intake.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let mut config = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            match serde_json::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %settings_path.display(), error = %e, "ignoring invalid settings file");
                    Config::default()
                }
            }
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save config to the data directory
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(data_dir.join(SETTINGS_FILE), content)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_BELVO_BASE_URL) {
            self.provider.base_url = url;
        }
        if let Some(id) = lookup(ENV_BELVO_SECRET_ID) {
            self.provider.secret_id = Some(id);
        }
        if let Some(password) = lookup(ENV_BELVO_SECRET_PASSWORD) {
            self.provider.secret_password = Some(password);
        }
        if let Some(url) = lookup(ENV_RATES_URL) {
            self.rates.source_url = url;
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log_level = level;
        }
        if let Some(token) = lookup(ENV_WEBHOOK_TOKEN) {
            self.webhooks.shared_token = Some(token);
        }
    }

    /// Reject settings the engine cannot run with; clamp the page cap
    pub fn validate(&mut self) -> Result<()> {
        if self.provider.page_size == 0 {
            return Err(Error::Config("provider.pageSize must be positive".into()));
        }
        if self.provider.max_pages == 0 || self.provider.max_pages > MAX_PAGES_CEILING {
            warn!(
                requested = self.provider.max_pages,
                ceiling = MAX_PAGES_CEILING,
                "clamping provider.maxPages"
            );
            self.provider.max_pages = self.provider.max_pages.clamp(1, MAX_PAGES_CEILING);
        }
        self.rates.base_currency = self.rates.base_currency.trim().to_ascii_uppercase();
        if self.rates.base_currency.len() != 3 {
            return Err(Error::Config(format!(
                "rates.baseCurrency must be an ISO code, got '{}'",
                self.rates.base_currency
            )));
        }
        for code in self.rates.supported_currencies.iter_mut() {
            *code = code.trim().to_ascii_uppercase();
        }
        if !self
            .rates
            .supported_currencies
            .contains(&self.rates.base_currency)
        {
            self.rates
                .supported_currencies
                .push(self.rates.base_currency.clone());
        }
        Ok(())
    }
}
