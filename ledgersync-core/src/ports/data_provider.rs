//! Aggregator port
//!
//! Defines the interface for pulling transactions from an Open-Finance
//! aggregator (Belvo, a test double, etc.). Pagination is exposed one page
//! at a time so callers can process pages as they arrive.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::result::Result;
use crate::domain::RawTransaction;

/// Where to start or continue a paginated listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// First page of a listing, optionally bounded by value date
    Start {
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    },
    /// First page of a listing filtered to the given ids
    Ids(Vec<String>),
    /// Absolute URL from the previous page's `next`
    Next(String),
}

/// One page of aggregator results
#[derive(Debug, Default)]
pub struct TransactionPage {
    /// Records that passed validation
    pub transactions: Vec<RawTransaction>,
    /// Cursor for the following page; None on the last page
    pub next: Option<String>,
    /// Records dropped by validation
    pub invalid: usize,
}

/// Paginated transaction source
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Source name (e.g., "belvo")
    fn name(&self) -> &str;

    /// Fetch one page of transactions for a link
    ///
    /// Non-2xx answers fail with `ProviderUnavailable` carrying the HTTP
    /// status, or `RateLimited` for 429.
    async fn fetch_page(&self, link_id: &str, cursor: &PageCursor) -> Result<TransactionPage>;
}
