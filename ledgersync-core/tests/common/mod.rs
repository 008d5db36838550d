//! Shared fixtures for the integration tests
//!
//! Storage is a real DuckDB file in a temp dir; the aggregator and the rate
//! source are faked at the trait level.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tempfile::TempDir;

use ledgersync_core::adapters::duckdb::DuckDbRepository;
use ledgersync_core::config::Config;
use ledgersync_core::domain::result::{Error, Result};
use ledgersync_core::domain::{
    ExchangeRates, FlowDirection, Institution, Integration, Provider, RateOrigin, RawTransaction,
};
use ledgersync_core::ports::{PageCursor, RateSource, TransactionPage, TransactionSource};
use ledgersync_core::LedgerSyncContext;

pub const USER_ID: i64 = 7;

// ============================================================================
// Fake aggregator
// ============================================================================

/// In-memory aggregator serving a fixed transaction list in pages
pub struct FakeSource {
    transactions: Mutex<Vec<RawTransaction>>,
    page_size: usize,
    /// Keep handing out `next` links with empty pages
    endless: AtomicUsize,
    /// Fail every request with this HTTP status
    fail_status: Mutex<Option<u16>>,
    /// Answer every request with 429 and this Retry-After
    rate_limited: Mutex<Option<Option<u64>>>,
    /// Fail requests for pages at or beyond this index (0-based)
    fail_from_page: Mutex<Option<usize>>,
    /// Invalid records reported on the first page
    invalid_on_first_page: AtomicUsize,
    delay: Mutex<Duration>,
    pub calls: Mutex<Vec<PageCursor>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(Vec::new()),
            page_size: 2,
            endless: AtomicUsize::new(0),
            fail_status: Mutex::new(None),
            rate_limited: Mutex::new(None),
            fail_from_page: Mutex::new(None),
            invalid_on_first_page: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_transactions(&self, transactions: Vec<RawTransaction>) {
        *self.transactions.lock().unwrap() = transactions;
    }

    pub fn set_endless(&self, endless: bool) {
        self.endless.store(endless as usize, Ordering::SeqCst);
    }

    pub fn fail_with(&self, status: Option<u16>) {
        *self.fail_status.lock().unwrap() = status;
    }

    pub fn rate_limit_with(&self, retry_after: Option<u64>) {
        *self.rate_limited.lock().unwrap() = Some(retry_after);
    }

    pub fn fail_from_page(&self, page: Option<usize>) {
        *self.fail_from_page.lock().unwrap() = page;
    }

    pub fn set_invalid(&self, count: usize) {
        self.invalid_on_first_page.store(count, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<PageCursor> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TransactionSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_page(&self, _link_id: &str, cursor: &PageCursor) -> Result<TransactionPage> {
        self.calls.lock().unwrap().push(cursor.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(retry_after) = *self.rate_limited.lock().unwrap() {
            return Err(Error::RateLimited { retry_after });
        }
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(Error::ProviderUnavailable {
                status: Some(status),
                message: "simulated outage".to_string(),
            });
        }

        let all = self.transactions.lock().unwrap().clone();
        let (matching, page): (Vec<RawTransaction>, usize) = match cursor {
            PageCursor::Start { date_from, date_to } => (
                all.into_iter()
                    .filter(|t| date_from.map_or(true, |from| t.value_date >= from))
                    .filter(|t| date_to.map_or(true, |to| t.value_date <= to))
                    .collect(),
                0,
            ),
            PageCursor::Ids(ids) => {
                let found = all.into_iter().filter(|t| ids.contains(&t.id)).collect();
                return Ok(TransactionPage {
                    transactions: found,
                    next: None,
                    invalid: 0,
                });
            }
            PageCursor::Next(n) => (all, n.parse().unwrap_or(0)),
        };

        if let Some(fail_from) = *self.fail_from_page.lock().unwrap() {
            if page >= fail_from {
                return Err(Error::ProviderUnavailable {
                    status: Some(503),
                    message: "simulated outage".to_string(),
                });
            }
        }

        let start = page * self.page_size;
        let transactions: Vec<RawTransaction> = matching
            .iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();
        let more = self.endless.load(Ordering::SeqCst) == 1 || start + self.page_size < matching.len();
        let invalid = if page == 0 {
            self.invalid_on_first_page.load(Ordering::SeqCst)
        } else {
            0
        };

        Ok(TransactionPage {
            transactions,
            next: more.then(|| (page + 1).to_string()),
            invalid,
        })
    }
}

// ============================================================================
// Fake rate source
// ============================================================================

/// Fixed USD-based rates
pub struct FixedRates {
    pub fail: bool,
}

pub fn usd_rates() -> ExchangeRates {
    ExchangeRates::new(
        "USD",
        Utc::now().date_naive(),
        [
            ("EUR".to_string(), Decimal::new(90, 2)),
            ("GBP".to_string(), Decimal::new(80, 2)),
            ("BRL".to_string(), Decimal::new(500, 2)),
            ("MXN".to_string(), Decimal::new(1700, 2)),
            ("CAD".to_string(), Decimal::new(135, 2)),
        ],
        RateOrigin::Live,
    )
}

#[async_trait]
impl RateSource for FixedRates {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_latest(&self, base: &str) -> Result<ExchangeRates> {
        if self.fail {
            return Err(Error::RatesUnavailable("rate source offline".to_string()));
        }
        usd_rates().rebase(base)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub ctx: LedgerSyncContext,
    pub source: Arc<FakeSource>,
    _dir: TempDir,
}

/// Config with short backoffs for tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.webhooks.conflict_backoff_ms = 20;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config(), false)
}

pub fn harness_with(config: Config, rates_offline: bool) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let repo = DuckDbRepository::new(&dir.path().join("test.duckdb"))
        .expect("Failed to create repository");
    repo.ensure_schema().expect("Failed to initialize schema");

    let source = Arc::new(FakeSource::new());
    let ctx = LedgerSyncContext::assemble(
        config,
        Arc::new(repo),
        source.clone(),
        Arc::new(FixedRates {
            fail: rates_offline,
        }),
    );
    Harness {
        ctx,
        source,
        _dir: dir,
    }
}

pub async fn connect(harness: &Harness, link_id: &str) -> Integration {
    harness
        .ctx
        .integration_service
        .connect(
            USER_ID,
            Provider::Belvo,
            link_id,
            Institution {
                id: "erebor_mx_retail".to_string(),
                name: Some("Erebor Bank".to_string()),
                logo_url: None,
                country: Some("MX".to_string()),
            },
        )
        .await
        .expect("Failed to connect integration")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Processed outflow, amount in cents
pub fn outflow(id: &str, cents: i64, currency: &str, day: NaiveDate) -> RawTransaction {
    let mut tx = RawTransaction::new(id, Decimal::new(cents, 2), currency, day);
    tx.account_ref = Some("acc-1".to_string());
    tx.description = Some(format!("Purchase {}", id));
    tx
}

pub fn inflow(id: &str, cents: i64, currency: &str, day: NaiveDate) -> RawTransaction {
    let mut tx = outflow(id, cents, currency, day);
    tx.flow = FlowDirection::Inflow;
    tx.account_ref = Some("acc-2".to_string());
    tx
}

/// Serialized webhook body
pub fn webhook(webhook_type: &str, code: &str, link_id: &str, data: Value) -> Vec<u8> {
    json!({
        "webhook_id": format!("wh-{}", code),
        "webhook_type": webhook_type,
        "webhook_code": code,
        "link_id": link_id,
        "request_id": "req-123",
        "external_id": null,
        "data": data
    })
    .to_string()
    .into_bytes()
}
