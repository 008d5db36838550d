//! Aggregator-native transaction record, before normalization

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Processing status reported by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawStatus {
    Pending,
    Processed,
    Other(String),
}

impl RawStatus {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => RawStatus::Pending,
            "PROCESSED" => RawStatus::Processed,
            _ => RawStatus::Other(value.to_string()),
        }
    }
}

/// Money direction marker (Belvo `type`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowDirection {
    Inflow,
    Outflow,
    Unknown(String),
}

impl FlowDirection {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "INFLOW" => FlowDirection::Inflow,
            "OUTFLOW" => FlowDirection::Outflow,
            _ => FlowDirection::Unknown(value.to_string()),
        }
    }
}

/// A transaction as reported by the aggregator
///
/// Ephemeral: never persisted as-is, only converted into a `LedgerEntry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Aggregator transaction id; becomes the ledger deduplication key
    pub id: String,
    pub account_ref: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub value_date: NaiveDate,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub merchant: Option<String>,
    pub flow: FlowDirection,
    pub status: RawStatus,
}

impl RawTransaction {
    /// Processed outflow with the given id, amount and currency
    pub fn new(
        id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        value_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            account_ref: None,
            amount,
            currency: currency.into(),
            value_date,
            description: None,
            category: None,
            subcategory: None,
            merchant: None,
            flow: FlowDirection::Outflow,
            status: RawStatus::Processed,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == RawStatus::Processed
    }

    /// First eight characters of the id, for synthesized descriptions
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}
