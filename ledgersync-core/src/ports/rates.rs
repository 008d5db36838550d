//! Exchange-rate ports

use async_trait::async_trait;

use crate::domain::result::Result;
use crate::domain::ExchangeRates;

/// Live rate source (e.g. Frankfurter)
#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Today's rates relative to `base`
    async fn fetch_latest(&self, base: &str) -> Result<ExchangeRates>;
}

/// Rate lookup used by the converter
///
/// Fails with `RatesUnavailable` when no snapshot can be produced.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn get_rates(&self, base: &str) -> Result<ExchangeRates>;
}
