//! Storage ports

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::result::Result;
use crate::domain::{ExchangeRates, Integration, IntegrationStatus, LedgerEntry, SyncEvent, UpsertOutcome};

/// Integration persistence
///
/// The status column doubles as the per-integration sync lock, so the store
/// must offer a conditional write (`compare_and_set`).
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Insert a new integration; returns it with the store-assigned id
    async fn create(&self, integration: &Integration) -> Result<Integration>;

    async fn get(&self, id: i64) -> Result<Option<Integration>>;

    /// Look up by aggregator link id / access token
    async fn get_by_link(&self, link_id: &str) -> Result<Option<Integration>>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Integration>>;

    async fn list_all(&self) -> Result<Vec<Integration>>;

    /// Unconditional write of every mutable field
    async fn update(&self, integration: &Integration) -> Result<()>;

    /// Write only if the stored status still equals `expected`
    ///
    /// Returns false (and writes nothing) when another writer got there first.
    async fn compare_and_set(
        &self,
        integration: &Integration,
        expected: IntegrationStatus,
    ) -> Result<bool>;
}

/// Ledger persistence
///
/// `external_transaction_id` is unique; upserting on it is the only way
/// provider data enters the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the entry, or update the one with the same external id
    async fn upsert_by_external_id(&self, entry: &LedgerEntry) -> Result<UpsertOutcome>;

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<LedgerEntry>>;

    /// How many of the given external ids exist in the ledger
    async fn count_by_external_ids(&self, external_ids: &[String]) -> Result<usize>;

    /// Entry count, optionally for one integration
    async fn count_entries(&self, integration_id: Option<i64>) -> Result<usize>;

    /// Distinct aggregator accounts seen for an integration
    async fn distinct_account_count(&self, integration_id: i64) -> Result<i64>;

    async fn entries_for_integration(&self, integration_id: i64, limit: usize) -> Result<Vec<LedgerEntry>>;
}

/// Append-only sync audit log
#[async_trait]
pub trait SyncEventLog: Send + Sync {
    async fn record(&self, event: &SyncEvent) -> Result<()>;

    /// Newest first
    async fn recent(&self, integration_id: Option<i64>, limit: usize) -> Result<Vec<SyncEvent>>;
}

/// Persistent daily rate snapshots
#[async_trait]
pub trait RateCache: Send + Sync {
    async fn store_rates(&self, rates: &ExchangeRates) -> Result<()>;

    async fn load_rates(&self, base: &str, date: NaiveDate) -> Result<Option<ExchangeRates>>;

    /// Most recent snapshot for the base, whatever its date
    async fn latest_rates(&self, base: &str) -> Result<Option<ExchangeRates>>;
}
