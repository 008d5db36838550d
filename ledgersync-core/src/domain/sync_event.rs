//! Sync requests, results and the append-only sync audit log

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::integration::SyncStatus;
use super::result::Error;

/// The only data type the sync engine knows how to pull
pub const DATA_TYPE_TRANSACTIONS: &str = "transactions";

/// What started a sync attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncTrigger {
    Manual,
    /// Webhook code, e.g. "historical_update"
    Webhook(String),
}

impl SyncTrigger {
    pub fn as_str(&self) -> &str {
        match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Webhook(code) => code,
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    #[default]
    Full,
    Incremental,
}

impl FromStr for SyncType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(SyncType::Full),
            "incremental" => Ok(SyncType::Incremental),
            other => Err(Error::validation(format!("Unknown sync type: {}", other))),
        }
    }
}

/// Body of a manual sync request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub sync_type: SyncType,
    #[serde(default = "default_data_types")]
    pub data_types: Vec<String>,
}

fn default_data_types() -> Vec<String> {
    vec![DATA_TYPE_TRANSACTIONS.to_string()]
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            sync_type: SyncType::Full,
            data_types: default_data_types(),
        }
    }
}

impl SyncRequest {
    pub fn incremental() -> Self {
        Self {
            sync_type: SyncType::Incremental,
            ..Default::default()
        }
    }
}

/// Which transactions a sync pulls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Every transaction of the link, optionally bounded by value date
    Range {
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    },
    /// Only the listed transaction ids
    Ids(Vec<String>),
}

impl SyncScope {
    pub fn everything() -> Self {
        SyncScope::Range {
            date_from: None,
            date_to: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncScope::Range {
                date_from: None,
                date_to: None,
            } => "full",
            SyncScope::Range { .. } => "range",
            SyncScope::Ids(_) => "targeted",
        }
    }
}

/// Per-attempt record counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    /// Records returned by the aggregator (valid and invalid)
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    /// Pending or unknown-direction records
    pub skipped: usize,
    /// Invalid records and records that failed conversion
    pub failed: usize,
}

impl SyncCounts {
    pub fn persisted(&self) -> usize {
        self.created + self.updated
    }
}

/// Overall outcome of an attempt
///
/// `partial` covers a successful fetch with record failures or a page-cap
/// cut, and a failed fetch after some pages were already persisted.
pub fn derive_sync_status(fetch_succeeded: bool, counts: &SyncCounts, capped: bool) -> SyncStatus {
    if fetch_succeeded {
        if counts.failed == 0 && !capped {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        }
    } else if counts.persisted() > 0 {
        SyncStatus::Partial
    } else {
        SyncStatus::Failed
    }
}

/// Summary returned to the caller of a sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub integration_id: i64,
    pub trigger: String,
    pub scope: String,
    /// Whether the fetch completed
    pub success: bool,
    pub sync_status: SyncStatus,
    #[serde(flatten)]
    pub counts: SyncCounts,
    pub pages: usize,
    /// The page cap cut the fetch short
    pub capped: bool,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    /// `Error::kind` of the failure that ended the fetch
    pub error_kind: Option<String>,
    /// Backoff requested by a 429, in seconds
    pub retry_after: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// One row of the sync audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: Uuid,
    pub integration_id: i64,
    pub trigger: String,
    /// "full", "range", "targeted" or "audit"
    pub scope: String,
    pub success: bool,
    pub counts: SyncCounts,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub retry_after: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncEvent {
    pub fn from_result(result: &SyncResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            integration_id: result.integration_id,
            trigger: result.trigger.clone(),
            scope: result.scope.clone(),
            success: result.success,
            counts: result.counts,
            error: result.error.clone(),
            error_kind: result.error_kind.clone(),
            retry_after: result.retry_after,
            started_at: result.started_at,
            completed_at: Some(result.completed_at),
        }
    }

    /// Audit-only event that did not touch the ledger
    pub fn audit(integration_id: i64, trigger: &SyncTrigger, detail: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            integration_id,
            trigger: trigger.as_str().to_string(),
            scope: "audit".to_string(),
            success: true,
            counts: SyncCounts::default(),
            error: Some(detail.into()),
            error_kind: None,
            retry_after: None,
            started_at: now,
            completed_at: Some(now),
        }
    }
}
