//! Exchange-rate snapshot and base-currency conversion

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::result::{Error, Result};

/// Where a rate snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateOrigin {
    /// Fetched from the live source today
    Live,
    /// Stored snapshot from an earlier day, served because the live fetch failed
    Stale,
    /// Fixed fallback table from configuration
    Fallback,
}

/// Rates of each currency relative to one base currency (base = 1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub base: String,
    pub date: NaiveDate,
    pub rates: BTreeMap<String, Decimal>,
    pub origin: RateOrigin,
}

impl ExchangeRates {
    /// Build a snapshot; the base currency is always present with rate 1
    pub fn new(
        base: impl Into<String>,
        date: NaiveDate,
        rates: impl IntoIterator<Item = (String, Decimal)>,
        origin: RateOrigin,
    ) -> Self {
        let base = base.into().to_ascii_uppercase();
        let mut map: BTreeMap<String, Decimal> = rates
            .into_iter()
            .filter(|(_, rate)| *rate > Decimal::ZERO)
            .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
            .collect();
        map.insert(base.clone(), Decimal::ONE);
        Self {
            base,
            date,
            rates: map,
            origin,
        }
    }

    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(&currency.to_ascii_uppercase()).copied()
    }

    pub fn supports(&self, currency: &str) -> bool {
        self.rate(currency).is_some()
    }

    /// `target = (amount / rate[from]) * rate[to]`
    pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal> {
        let from_rate = self
            .rate(from)
            .ok_or_else(|| Error::invalid_record(format!("Unsupported currency: {}", from)))?;
        let to_rate = self
            .rate(to)
            .ok_or_else(|| Error::invalid_record(format!("Unsupported currency: {}", to)))?;

        let in_base = amount
            .checked_div(from_rate)
            .ok_or_else(|| Error::invalid_record(format!("Cannot convert from {}", from)))?;
        in_base
            .checked_mul(to_rate)
            .ok_or_else(|| Error::invalid_record(format!("Conversion overflow into {}", to)))
    }

    /// Amount expressed in every currency of `targets` the snapshot knows
    ///
    /// Values are rounded to cents; targets missing from the snapshot are
    /// left out.
    pub fn convert_all(
        &self,
        amount: Decimal,
        from: &str,
        targets: &[String],
    ) -> Result<BTreeMap<String, Decimal>> {
        let mut amounts = BTreeMap::new();
        for target in targets {
            let code = target.to_ascii_uppercase();
            if !self.supports(&code) {
                continue;
            }
            let converted = self.convert(amount, from, &code)?;
            amounts.insert(code, converted.round_dp(2));
        }
        Ok(amounts)
    }

    /// Same rates expressed relative to another base currency
    pub fn rebase(&self, new_base: &str) -> Result<Self> {
        let new_base = new_base.to_ascii_uppercase();
        if new_base == self.base {
            return Ok(self.clone());
        }
        let pivot = self.rate(&new_base).ok_or_else(|| {
            Error::RatesUnavailable(format!("No rate for base currency {}", new_base))
        })?;
        let rates = self
            .rates
            .iter()
            .filter_map(|(code, rate)| rate.checked_div(pivot).map(|r| (code.clone(), r)));
        Ok(Self::new(new_base, self.date, rates, self.origin))
    }

    /// Only the given currencies (plus the base)
    pub fn restricted_to(&self, currencies: &[String]) -> Self {
        let rates = self
            .rates
            .iter()
            .filter(|(code, _)| currencies.iter().any(|c| c.eq_ignore_ascii_case(code)))
            .map(|(code, rate)| (code.clone(), *rate));
        Self::new(self.base.clone(), self.date, rates, self.origin)
    }
}
