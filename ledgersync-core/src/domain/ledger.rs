//! Ledger entry domain model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rates::ExchangeRates;
use super::result::Error;

/// Expense or income
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Expense,
    Income,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Expense => "expense",
            EntryType::Income => "income",
        }
    }
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expense" => Ok(EntryType::Expense),
            "income" => Ok(EntryType::Income),
            other => Err(Error::validation(format!("Unknown entry type: {}", other))),
        }
    }
}

/// How the entry entered the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntrySource {
    Manual,
    AiProcessed,
    ProviderIntegration,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Manual => "manual",
            EntrySource::AiProcessed => "ai-processed",
            EntrySource::ProviderIntegration => "provider-integration",
        }
    }
}

impl FromStr for EntrySource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(EntrySource::Manual),
            "ai-processed" => Ok(EntrySource::AiProcessed),
            "provider-integration" => Ok(EntrySource::ProviderIntegration),
            other => Err(Error::validation(format!("Unknown entry source: {}", other))),
        }
    }
}

/// Normalized ledger categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Food & Dining")]
    FoodAndDining,
    Groceries,
    Transportation,
    Shopping,
    Entertainment,
    #[serde(rename = "Bills & Utilities")]
    BillsAndUtilities,
    Healthcare,
    Housing,
    Travel,
    Education,
    Subscriptions,
    Transfers,
    Taxes,
    Income,
    Other,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::FoodAndDining,
        Category::Groceries,
        Category::Transportation,
        Category::Shopping,
        Category::Entertainment,
        Category::BillsAndUtilities,
        Category::Healthcare,
        Category::Housing,
        Category::Travel,
        Category::Education,
        Category::Subscriptions,
        Category::Transfers,
        Category::Taxes,
        Category::Income,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FoodAndDining => "Food & Dining",
            Category::Groceries => "Groceries",
            Category::Transportation => "Transportation",
            Category::Shopping => "Shopping",
            Category::Entertainment => "Entertainment",
            Category::BillsAndUtilities => "Bills & Utilities",
            Category::Healthcare => "Healthcare",
            Category::Housing => "Housing",
            Category::Travel => "Travel",
            Category::Education => "Education",
            Category::Subscriptions => "Subscriptions",
            Category::Transfers => "Transfers",
            Category::Taxes => "Taxes",
            Category::Income => "Income",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| Error::validation(format!("Unknown category: {}", s)))
    }
}

/// Normalized expense/income record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: i64,
    /// Set for entries created by a provider sync
    pub integration_id: Option<i64>,
    /// Unsigned amount in `currency`
    pub amount: Decimal,
    pub currency: String,
    /// Amount in every supported currency
    pub amounts: BTreeMap<String, Decimal>,
    /// Rates used to compute `amounts`
    pub exchange_rates: Option<ExchangeRates>,
    pub category: Category,
    pub description: String,
    pub merchant: Option<String>,
    pub entry_type: EntryType,
    pub source: EntrySource,
    pub entry_date: NaiveDate,
    /// Aggregator account the transaction was booked on
    pub account_ref: Option<String>,
    /// Deduplication key; unique when present
    pub external_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Manual entry with a single-currency amount
    pub fn new(
        user_id: i64,
        amount: Decimal,
        currency: impl Into<String>,
        entry_type: EntryType,
        entry_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        let currency = currency.into().to_ascii_uppercase();
        let mut amounts = BTreeMap::new();
        amounts.insert(currency.clone(), amount.abs());
        Self {
            id: Uuid::new_v4(),
            user_id,
            integration_id: None,
            amount: amount.abs(),
            currency,
            amounts,
            exchange_rates: None,
            category: Category::Other,
            description: String::new(),
            merchant: None,
            entry_type,
            source: EntrySource::Manual,
            entry_date,
            account_ref: None,
            external_transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy the provider-owned fields of `incoming` onto this entry
    ///
    /// Identity (id, owner, creation time) is kept so an update lands on the
    /// same row.
    pub fn apply_update(&mut self, incoming: &LedgerEntry) {
        self.amount = incoming.amount;
        self.currency = incoming.currency.clone();
        self.amounts = incoming.amounts.clone();
        self.exchange_rates = incoming.exchange_rates.clone();
        self.category = incoming.category;
        self.description = incoming.description.clone();
        self.merchant = incoming.merchant.clone();
        self.entry_type = incoming.entry_type;
        self.entry_date = incoming.entry_date;
        self.account_ref = incoming.account_ref.clone();
        if incoming.integration_id.is_some() {
            self.integration_id = incoming.integration_id;
        }
        self.updated_at = Utc::now();
    }
}

/// Whether an upsert created a row or updated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Created,
    Updated,
}

/// Result of `LedgerStore::upsert_by_external_id`
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub entry: LedgerEntry,
    pub kind: UpsertKind,
}
