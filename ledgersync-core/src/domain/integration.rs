//! Integration domain model and connection state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::result::Error;

/// Open-Finance aggregator brokering the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    Belvo,
    Plaid,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Belvo => "BELVO",
            Provider::Plaid => "PLAID",
        }
    }

    /// Human-readable name used in synthesized descriptions
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Belvo => "Belvo",
            Provider::Plaid => "Plaid",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BELVO" => Ok(Provider::Belvo),
            "PLAID" => Ok(Provider::Plaid),
            other => Err(Error::validation(format!("Unknown provider: {}", other))),
        }
    }
}

/// Connection status of an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntegrationStatus {
    Pending,
    Connected,
    Syncing,
    Error,
    Expired,
    Disconnected,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Pending => "PENDING",
            IntegrationStatus::Connected => "CONNECTED",
            IntegrationStatus::Syncing => "SYNCING",
            IntegrationStatus::Error => "ERROR",
            IntegrationStatus::Expired => "EXPIRED",
            IntegrationStatus::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(IntegrationStatus::Pending),
            "CONNECTED" => Ok(IntegrationStatus::Connected),
            "SYNCING" => Ok(IntegrationStatus::Syncing),
            "ERROR" => Ok(IntegrationStatus::Error),
            "EXPIRED" => Ok(IntegrationStatus::Expired),
            "DISCONNECTED" => Ok(IntegrationStatus::Disconnected),
            other => Err(Error::validation(format!("Unknown status: {}", other))),
        }
    }
}

/// Outcome of the last sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
    Partial,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(SyncStatus::Success),
            "failed" => Ok(SyncStatus::Failed),
            "partial" => Ok(SyncStatus::Partial),
            other => Err(Error::validation(format!("Unknown sync status: {}", other))),
        }
    }
}

/// Institution metadata reported by the aggregator widget
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    /// Aggregator institution code (e.g. "erebor_mx_retail")
    pub id: String,
    pub name: Option<String>,
    pub logo_url: Option<String>,
    pub country: Option<String>,
}

/// Result of applying a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed
    Applied(IntegrationStatus),
    /// The transition did not apply; the integration keeps this status
    NoOp(IntegrationStatus),
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn status(&self) -> IntegrationStatus {
        match self {
            Transition::Applied(s) | Transition::NoOp(s) => *s,
        }
    }
}

/// Bookkeeping reported by a finished sync attempt
#[derive(Debug, Clone, Default)]
pub struct SyncCompletion {
    pub fetch_succeeded: bool,
    pub sync_status: Option<SyncStatus>,
    pub error_message: Option<String>,
    /// Stored as the integration's error code; `SYNC_FAILED` when absent
    pub error_code: Option<String>,
    pub transactions_created: i64,
    pub accounts_count: Option<i64>,
    pub last_transaction_date: Option<NaiveDate>,
}

/// A user's connection to one institution through an aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    /// Store-assigned id; 0 until persisted
    pub id: i64,
    pub user_id: i64,
    pub provider: Provider,
    pub institution: Institution,
    /// Link id / access token; opaque secret
    #[serde(skip_serializing)]
    pub provider_access_token: String,

    pub status: IntegrationStatus,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub consent_expiry_date: Option<DateTime<Utc>>,

    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub sync_status: Option<SyncStatus>,
    pub accounts_count: i64,
    pub transactions_count: i64,
    pub last_transaction_date: Option<NaiveDate>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// New integration in PENDING state, before the widget handshake completes
    pub fn new(
        user_id: i64,
        provider: Provider,
        institution: Institution,
        provider_access_token: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            provider,
            institution,
            provider_access_token: provider_access_token.into(),
            status: IntegrationStatus::Pending,
            error_message: None,
            error_code: None,
            consent_expiry_date: None,
            last_sync_at: None,
            last_successful_sync_at: None,
            sync_status: None,
            accounts_count: 0,
            transactions_count: 0,
            last_transaction_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Link id truncated for log output
    pub fn masked_link(&self) -> String {
        mask_link_id(&self.provider_access_token)
    }

    pub fn is_sync_candidate(&self) -> bool {
        self.status == IntegrationStatus::Connected
    }

    /// Whether consent has lapsed at `now`
    pub fn consent_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.consent_expiry_date.is_some_and(|expiry| expiry < now)
    }

    /// PENDING -> CONNECTED once the aggregator confirmed the handshake.
    ///
    /// Also used for reconnection: a DISCONNECTED, ERROR or EXPIRED link
    /// that goes through the widget again is reset to CONNECTED.
    pub fn confirm_connection(&mut self) -> Transition {
        match self.status {
            IntegrationStatus::Connected | IntegrationStatus::Syncing => {
                Transition::NoOp(self.status)
            }
            _ => {
                self.error_message = None;
                self.error_code = None;
                self.set_status(IntegrationStatus::Connected)
            }
        }
    }

    /// CONNECTED -> SYNCING; anything else is a no-op
    pub fn begin_sync(&mut self) -> Transition {
        if self.status != IntegrationStatus::Connected {
            return Transition::NoOp(self.status);
        }
        self.set_status(IntegrationStatus::Syncing)
    }

    /// SYNCING -> CONNECTED (success) or ERROR (failure).
    ///
    /// Bookkeeping is always recorded. The status only moves when the
    /// integration is still SYNCING, so a consent expiry or disconnect that
    /// landed during the sync is kept.
    pub fn complete_sync(&mut self, completion: SyncCompletion) -> Transition {
        let now = Utc::now();
        self.last_sync_at = Some(now);
        self.transactions_count += completion.transactions_created;
        if let Some(count) = completion.accounts_count {
            self.accounts_count = count;
        }
        if let Some(date) = completion.last_transaction_date {
            self.last_transaction_date = Some(match self.last_transaction_date {
                Some(existing) if existing > date => existing,
                _ => date,
            });
        }
        self.sync_status = Some(completion.sync_status.unwrap_or(
            if completion.fetch_succeeded {
                SyncStatus::Success
            } else {
                SyncStatus::Failed
            },
        ));
        if completion.fetch_succeeded {
            self.last_successful_sync_at = Some(now);
        }
        self.updated_at = now;

        if self.status != IntegrationStatus::Syncing {
            return Transition::NoOp(self.status);
        }

        if completion.fetch_succeeded {
            self.error_message = None;
            self.error_code = None;
            self.set_status(IntegrationStatus::Connected)
        } else {
            self.error_message = Some(
                completion
                    .error_message
                    .unwrap_or_else(|| "Sync failed".to_string()),
            );
            self.error_code = Some(
                completion
                    .error_code
                    .unwrap_or_else(|| "SYNC_FAILED".to_string()),
            );
            self.set_status(IntegrationStatus::Error)
        }
    }

    /// Any state except DISCONNECTED -> EXPIRED
    pub fn expire_consent(
        &mut self,
        message: impl Into<String>,
        expiry: Option<DateTime<Utc>>,
    ) -> Transition {
        if self.status == IntegrationStatus::Disconnected {
            return Transition::NoOp(self.status);
        }
        self.error_message = Some(message.into());
        self.error_code = Some("CONSENT_EXPIRED".to_string());
        self.consent_expiry_date = Some(expiry.unwrap_or_else(Utc::now));
        if self.status == IntegrationStatus::Expired {
            self.updated_at = Utc::now();
            return Transition::NoOp(self.status);
        }
        self.set_status(IntegrationStatus::Expired)
    }

    /// Any state -> DISCONNECTED; idempotent
    pub fn disconnect(&mut self) -> Transition {
        if self.status == IntegrationStatus::Disconnected {
            return Transition::NoOp(self.status);
        }
        self.set_status(IntegrationStatus::Disconnected)
    }

    fn set_status(&mut self, status: IntegrationStatus) -> Transition {
        self.status = status;
        self.updated_at = Utc::now();
        Transition::Applied(status)
    }
}

/// Keep the first few characters of a link id; enough to correlate logs
pub fn mask_link_id(link_id: &str) -> String {
    let visible: String = link_id.chars().take(8).collect();
    if link_id.chars().count() > 8 {
        format!("{}…", visible)
    } else {
        visible
    }
}
