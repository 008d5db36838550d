//! Result and error types for the core library

use thiserror::Error;

use super::integration::IntegrationStatus;

/// Core library error type
///
/// Variants split into two groups. The first group is the sync taxonomy the
/// webhook dispatcher and orchestrator branch on; the second covers
/// infrastructure failures (storage, configuration, I/O).
#[derive(Error, Debug)]
pub enum Error {
    /// Webhook body could not be parsed as JSON
    #[error("Malformed webhook: {message}")]
    MalformedWebhook {
        message: String,
        request_id: Option<String>,
    },

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    /// Operation not allowed in the integration's current state
    #[error("Integration {id} is {status}, expected {expected}")]
    InvalidState {
        id: i64,
        status: IntegrationStatus,
        expected: IntegrationStatus,
    },

    /// Aggregator unreachable or answered with a non-2xx status
    #[error("{}", provider_unavailable_message(.status, .message))]
    ProviderUnavailable { status: Option<u16>, message: String },

    /// Aggregator answered 429
    #[error("Aggregator rate limit exceeded{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    /// A single malformed transaction
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Exchange rates unavailable: {0}")]
    RatesUnavailable(String),

    /// Another sync holds the integration
    #[error("Sync already in progress for integration {0}")]
    SyncConflict(i64),

    #[error("Unauthorized webhook")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn provider_unavailable_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Aggregator error (HTTP {}): {}", code, message),
        None => format!("Aggregator unavailable: {}", message),
    }
}

fn retry_after_suffix(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(", retry after {}s", secs),
        None => String::new(),
    }
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create a provider error without an HTTP status
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            status: None,
            message: msg.into(),
        }
    }

    /// Whether a retry of the same aggregator call may succeed
    ///
    /// Connection failures and 5xx answers are transient; 4xx answers and
    /// rate limiting are not (429 needs a caller-side backoff instead).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderUnavailable { status: None, .. } => true,
            Self::ProviderUnavailable {
                status: Some(code), ..
            } => *code >= 500,
            _ => false,
        }
    }

    /// Stable machine-readable code, stored with failed syncs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedWebhook { .. } => "MALFORMED_WEBHOOK",
            Self::IntegrationNotFound(_) => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::InvalidRecord(_) => "INVALID_RECORD",
            Self::RatesUnavailable(_) => "RATES_UNAVAILABLE",
            Self::SyncConflict(_) => "SYNC_CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Database(_) => "DATABASE",
            Self::Config(_) => "CONFIG",
            Self::Validation(_) => "VALIDATION",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
        }
    }

    /// Seconds the aggregator asked us to wait, for 429 answers
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Errors that only affect one record and must not abort a batch
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::InvalidRecord(_) | Self::RatesUnavailable(_))
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
