//! Rate provider - daily cached exchange rates with stale and fallback tiers
//!
//! Lookup order for a base currency:
//! 1. today's snapshot held in memory
//! 2. today's snapshot in the rate cache table
//! 3. the live source (stored on success)
//! 4. the most recent stored snapshot, marked stale
//! 5. the configured fallback table, rebased

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{ExchangeRates, RateOrigin};
use crate::ports::{RateCache, RateProvider, RateSource};

pub struct CachedRateProvider {
    source: Arc<dyn RateSource>,
    cache: Arc<dyn RateCache>,
    /// (day fetched, snapshot) per base currency
    memory: Mutex<HashMap<String, (NaiveDate, ExchangeRates)>>,
    fallback_base: String,
    fallback: BTreeMap<String, Decimal>,
}

impl CachedRateProvider {
    pub fn new(
        source: Arc<dyn RateSource>,
        cache: Arc<dyn RateCache>,
        fallback_base: impl Into<String>,
        fallback: BTreeMap<String, Decimal>,
    ) -> Self {
        Self {
            source,
            cache,
            memory: Mutex::new(HashMap::new()),
            fallback_base: fallback_base.into().to_ascii_uppercase(),
            fallback,
        }
    }

    fn remembered(&self, base: &str, today: NaiveDate) -> Option<ExchangeRates> {
        let memory = self.memory.lock().ok()?;
        memory
            .get(base)
            .filter(|(day, _)| *day == today)
            .map(|(_, rates)| rates.clone())
    }

    fn remember(&self, base: &str, today: NaiveDate, rates: &ExchangeRates) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.insert(base.to_string(), (today, rates.clone()));
        }
    }

    fn fallback_rates(&self, base: &str, today: NaiveDate) -> Result<ExchangeRates> {
        if self.fallback.is_empty() {
            return Err(Error::RatesUnavailable(format!(
                "No rates for {} and no fallback table configured",
                base
            )));
        }
        let table = ExchangeRates::new(
            self.fallback_base.clone(),
            today,
            self.fallback.clone(),
            RateOrigin::Fallback,
        );
        table.rebase(base)
    }
}

#[async_trait]
impl RateProvider for CachedRateProvider {
    async fn get_rates(&self, base: &str) -> Result<ExchangeRates> {
        let base = base.trim().to_ascii_uppercase();
        let today = Utc::now().date_naive();

        if let Some(rates) = self.remembered(&base, today) {
            return Ok(rates);
        }

        match self.cache.load_rates(&base, today).await {
            Ok(Some(rates)) => {
                debug!(base = %base, "using today's cached rates");
                self.remember(&base, today, &rates);
                return Ok(rates);
            }
            Ok(None) => {}
            Err(e) => warn!(base = %base, error = %e, "rate cache lookup failed"),
        }

        match self.source.fetch_latest(&base).await {
            Ok(rates) => {
                info!(
                    base = %base,
                    source = self.source.name(),
                    date = %rates.date,
                    currencies = rates.rates.len(),
                    "fetched live exchange rates"
                );
                if let Err(e) = self.cache.store_rates(&rates).await {
                    warn!(base = %base, error = %e, "failed to store exchange rates");
                }
                self.remember(&base, today, &rates);
                return Ok(rates);
            }
            Err(e) => warn!(base = %base, error = %e, "live exchange rates unavailable"),
        }

        match self.cache.latest_rates(&base).await {
            Ok(Some(mut rates)) => {
                warn!(base = %base, date = %rates.date, "serving stale exchange rates");
                rates.origin = RateOrigin::Stale;
                return Ok(rates);
            }
            Ok(None) => {}
            Err(e) => warn!(base = %base, error = %e, "rate cache lookup failed"),
        }

        warn!(base = %base, "falling back to fixed exchange rates");
        self.fallback_rates(&base, today)
    }
}
