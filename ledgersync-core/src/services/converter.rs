//! Transaction converter - aggregator records to ledger entries

use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::result::{Error, Result};
use crate::domain::{
    EntrySource, EntryType, ExchangeRates, FlowDirection, Integration, LedgerEntry,
    RawTransaction,
};
use crate::services::category::CategoryMapper;

/// Why a record produced no entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Pending or otherwise not yet booked
    NotProcessed,
    /// Neither inflow nor outflow
    UnknownDirection,
}

/// Result of converting one record
#[derive(Debug, Clone)]
pub enum Conversion {
    Entry(Box<LedgerEntry>),
    Skipped(SkipReason),
}

/// Builds ledger entries from validated aggregator records
#[derive(Debug, Clone)]
pub struct TransactionConverter {
    mapper: CategoryMapper,
    supported_currencies: Vec<String>,
}

impl TransactionConverter {
    pub fn new(supported_currencies: Vec<String>) -> Self {
        Self {
            mapper: CategoryMapper::new(),
            supported_currencies: supported_currencies
                .into_iter()
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        }
    }

    /// Convert one record
    ///
    /// Fails with `InvalidRecord` for a zero amount or a currency the rate
    /// snapshot does not know. Such failures concern this record only.
    pub fn convert(
        &self,
        raw: &RawTransaction,
        integration: &Integration,
        rates: &ExchangeRates,
    ) -> Result<Conversion> {
        if !raw.is_processed() {
            debug!(transaction_id = %raw.id, "skipping unprocessed transaction");
            return Ok(Conversion::Skipped(SkipReason::NotProcessed));
        }

        let entry_type = match raw.flow {
            FlowDirection::Inflow => EntryType::Income,
            FlowDirection::Outflow => EntryType::Expense,
            FlowDirection::Unknown(_) => {
                debug!(transaction_id = %raw.id, "skipping transaction without direction");
                return Ok(Conversion::Skipped(SkipReason::UnknownDirection));
            }
        };

        let amount = raw.amount.abs();
        if amount == Decimal::ZERO {
            return Err(Error::invalid_record(format!(
                "Transaction {} has a zero amount",
                raw.id
            )));
        }

        let currency = raw.currency.trim().to_ascii_uppercase();
        if !rates.supports(&currency) {
            return Err(Error::invalid_record(format!(
                "Transaction {} has unsupported currency '{}'",
                raw.id, raw.currency
            )));
        }

        let mut amounts = rates.convert_all(amount, &currency, &self.supported_currencies)?;
        amounts.insert(currency.clone(), amount.round_dp(2));

        let description = raw
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "{} transaction {}",
                    integration.provider.display_name(),
                    raw.short_id()
                )
            });

        let category = self.mapper.map(
            entry_type,
            raw.category.as_deref(),
            raw.subcategory.as_deref(),
            Some(description.as_str()),
        );

        let mut entry = LedgerEntry::new(
            integration.user_id,
            amount,
            currency,
            entry_type,
            raw.value_date,
        );
        entry.integration_id = Some(integration.id);
        entry.amounts = amounts;
        entry.exchange_rates = Some(rates.restricted_to(&self.supported_currencies));
        entry.category = category;
        entry.description = description;
        entry.merchant = raw.merchant.clone();
        entry.source = EntrySource::ProviderIntegration;
        entry.account_ref = raw.account_ref.clone();
        entry.external_transaction_id = Some(raw.id.clone());

        Ok(Conversion::Entry(Box::new(entry)))
    }
}
