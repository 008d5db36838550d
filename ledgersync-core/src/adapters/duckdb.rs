//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use duckdb::{params, params_from_iter, Connection, OptionalExt};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    ExchangeRates, Institution, Integration, IntegrationStatus, LedgerEntry, RateOrigin,
    SyncCounts, SyncEvent, SyncStatus, UpsertKind, UpsertOutcome,
};
use crate::ports::{IntegrationStore, LedgerStore, RateCache, SyncEventLog};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

fn is_constraint_violation(err: &duckdb::Error) -> bool {
    let lower = err.to_string().to_lowercase();
    lower.contains("constraint") || lower.contains("duplicate key")
}

const INTEGRATION_COLUMNS: &str = "integration_id, user_id, provider, provider_access_token,
    institution_id, institution_name, institution_logo_url, institution_country,
    status, error_message, error_code, consent_expiry_date,
    last_sync_at, last_successful_sync_at, sync_status, accounts_count, transactions_count,
    last_transaction_date::VARCHAR, created_at, updated_at";

const LEDGER_COLUMNS: &str = "entry_id, user_id, integration_id, CAST(amount AS VARCHAR), currency,
    amounts, exchange_rates, category, description, merchant, entry_type, source,
    entry_date::VARCHAR, account_ref, external_transaction_id, created_at, updated_at";

const EVENT_COLUMNS: &str = "event_id, integration_id, sync_trigger, scope, success,
    processed, created, updated, skipped, failed, error, started_at, completed_at,
    error_kind, retry_after";

/// DuckDB repository implementation
///
/// One connection behind a mutex. Every port method runs its statements
/// while holding the lock, which makes read-then-write sequences (upsert,
/// compare-and-set) atomic within the process.
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Retries with exponential backoff when the file is locked by another
    /// process (e.g. a webhook worker and a CLI sync starting together).
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    attempt += 1;
                    if !is_retryable_error(&err_msg) || attempt >= MAX_RETRIES {
                        return Err(Error::database(err_msg));
                    }
                    let delay =
                        Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt - 1));
                    warn!(
                        attempt,
                        max_retries = MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        error = %err_msg,
                        "database busy, retrying"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    fn try_open_connection(db_path: &Path) -> std::result::Result<Connection, duckdb::Error> {
        // Extension autoloading stays off; JSON is statically linked via the "json" feature
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Connection::open_with_flags(db_path, config)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::database("connection mutex poisoned"))
    }

    /// Run pending migrations
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            debug!(applied = ?result.applied, "schema upgraded");
        }
        Ok(())
    }

    // === Integration operations ===

    fn query_integrations(
        conn: &Connection,
        where_clause: &str,
        values: &[&dyn duckdb::ToSql],
    ) -> Result<Vec<Integration>> {
        let sql = format!(
            "SELECT {} FROM sys_integrations {} ORDER BY integration_id",
            INTEGRATION_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(values, row_to_integration)?;
        let mut integrations = Vec::new();
        for row in rows {
            integrations.push(row?);
        }
        Ok(integrations)
    }

    fn write_integration(
        conn: &Connection,
        integration: &Integration,
        expected: Option<IntegrationStatus>,
    ) -> Result<usize> {
        let mut sql = String::from(
            "UPDATE sys_integrations SET
                institution_id = ?, institution_name = ?, institution_logo_url = ?, institution_country = ?,
                status = ?, error_message = ?, error_code = ?, consent_expiry_date = ?,
                last_sync_at = ?, last_successful_sync_at = ?, sync_status = ?,
                accounts_count = ?, transactions_count = ?, last_transaction_date = ?,
                updated_at = ?
             WHERE integration_id = ?",
        );
        if expected.is_some() {
            sql.push_str(" AND status = ?");
        }

        let institution = &integration.institution;
        let status = integration.status.as_str();
        let consent_expiry = integration.consent_expiry_date.map(format_timestamp);
        let last_sync = integration.last_sync_at.map(format_timestamp);
        let last_success = integration.last_successful_sync_at.map(format_timestamp);
        let sync_status = integration.sync_status.map(|s| s.as_str());
        let last_tx_date = integration.last_transaction_date.map(|d| d.to_string());
        let updated_at = format_timestamp(integration.updated_at);
        let expected_status = expected.map(|s| s.as_str());

        let mut values: Vec<&dyn duckdb::ToSql> = vec![
            &institution.id,
            &institution.name,
            &institution.logo_url,
            &institution.country,
            &status,
            &integration.error_message,
            &integration.error_code,
            &consent_expiry,
            &last_sync,
            &last_success,
            &sync_status,
            &integration.accounts_count,
            &integration.transactions_count,
            &last_tx_date,
            &updated_at,
            &integration.id,
        ];
        if let Some(expected_status) = expected_status.as_ref() {
            values.push(expected_status);
        }

        Ok(conn.execute(&sql, values.as_slice())?)
    }

    // === Ledger operations ===

    fn find_entry(conn: &Connection, external_id: &str) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM sys_ledger_entries WHERE external_transaction_id = ?",
            LEDGER_COLUMNS
        );
        let entry = conn
            .query_row(&sql, [external_id], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    fn insert_entry(conn: &Connection, entry: &LedgerEntry) -> std::result::Result<usize, duckdb::Error> {
        let amounts = serde_json::to_string(&entry.amounts).unwrap_or_else(|_| "{}".to_string());
        let rates = entry
            .exchange_rates
            .as_ref()
            .and_then(|r| serde_json::to_string(r).ok());
        conn.execute(
            "INSERT INTO sys_ledger_entries (entry_id, user_id, integration_id, amount, currency,
                                             amounts, exchange_rates, category, description, merchant,
                                             entry_type, source, entry_date, account_ref,
                                             external_transaction_id, created_at, updated_at)
             VALUES (?, ?, ?, CAST(? AS DECIMAL(18, 4)), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.id.to_string(),
                entry.user_id,
                entry.integration_id,
                entry.amount.to_string(),
                entry.currency,
                amounts,
                rates,
                entry.category.as_str(),
                entry.description,
                entry.merchant,
                entry.entry_type.as_str(),
                entry.source.as_str(),
                entry.entry_date.to_string(),
                entry.account_ref,
                entry.external_transaction_id,
                format_timestamp(entry.created_at),
                format_timestamp(entry.updated_at),
            ],
        )
    }

    /// Rewrite the provider-owned columns; the external id is never touched
    fn update_entry(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
        let amounts = serde_json::to_string(&entry.amounts)?;
        let rates = match &entry.exchange_rates {
            Some(r) => Some(serde_json::to_string(r)?),
            None => None,
        };
        conn.execute(
            "UPDATE sys_ledger_entries SET
                amount = CAST(? AS DECIMAL(18, 4)), currency = ?, amounts = ?, exchange_rates = ?,
                category = ?, description = ?, merchant = ?, entry_type = ?, entry_date = ?,
                account_ref = ?, updated_at = ?
             WHERE entry_id = ?",
            params![
                entry.amount.to_string(),
                entry.currency,
                amounts,
                rates,
                entry.category.as_str(),
                entry.description,
                entry.merchant,
                entry.entry_type.as_str(),
                entry.entry_date.to_string(),
                entry.account_ref,
                format_timestamp(entry.updated_at),
                entry.id.to_string(),
            ],
        )?;
        Ok(())
    }

    fn upsert_entry(&self, entry: &LedgerEntry) -> Result<UpsertOutcome> {
        let external_id = entry
            .external_transaction_id
            .as_deref()
            .ok_or_else(|| Error::validation("Upsert requires an external transaction id"))?;

        let conn = self.conn()?;
        if let Some(mut existing) = Self::find_entry(&conn, external_id)? {
            existing.apply_update(entry);
            Self::update_entry(&conn, &existing)?;
            return Ok(UpsertOutcome {
                entry: existing,
                kind: UpsertKind::Updated,
            });
        }

        match Self::insert_entry(&conn, entry) {
            Ok(_) => Ok(UpsertOutcome {
                entry: entry.clone(),
                kind: UpsertKind::Created,
            }),
            // Another process inserted the same external id in between
            Err(e) if is_constraint_violation(&e) => {
                let mut existing = Self::find_entry(&conn, external_id)?
                    .ok_or_else(|| Error::database(e.to_string()))?;
                existing.apply_update(entry);
                Self::update_entry(&conn, &existing)?;
                Ok(UpsertOutcome {
                    entry: existing,
                    kind: UpsertKind::Updated,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl IntegrationStore for DuckDbRepository {
    async fn create(&self, integration: &Integration) -> Result<Integration> {
        let conn = self.conn()?;
        let institution = &integration.institution;
        let id: i64 = conn.query_row(
            "INSERT INTO sys_integrations (user_id, provider, provider_access_token,
                                           institution_id, institution_name, institution_logo_url, institution_country,
                                           status, error_message, error_code, consent_expiry_date,
                                           last_sync_at, last_successful_sync_at, sync_status,
                                           accounts_count, transactions_count, last_transaction_date,
                                           created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING integration_id",
            params![
                integration.user_id,
                integration.provider.as_str(),
                integration.provider_access_token,
                institution.id,
                institution.name,
                institution.logo_url,
                institution.country,
                integration.status.as_str(),
                integration.error_message,
                integration.error_code,
                integration.consent_expiry_date.map(format_timestamp),
                integration.last_sync_at.map(format_timestamp),
                integration.last_successful_sync_at.map(format_timestamp),
                integration.sync_status.map(|s| s.as_str()),
                integration.accounts_count,
                integration.transactions_count,
                integration.last_transaction_date.map(|d| d.to_string()),
                format_timestamp(integration.created_at),
                format_timestamp(integration.updated_at),
            ],
            |row| row.get(0),
        )?;

        let mut created = integration.clone();
        created.id = id;
        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<Integration>> {
        let conn = self.conn()?;
        Ok(Self::query_integrations(&conn, "WHERE integration_id = ?", &[&id])?
            .into_iter()
            .next())
    }

    async fn get_by_link(&self, link_id: &str) -> Result<Option<Integration>> {
        let conn = self.conn()?;
        Ok(
            Self::query_integrations(&conn, "WHERE provider_access_token = ?", &[&link_id])?
                .into_iter()
                .next(),
        )
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Integration>> {
        let conn = self.conn()?;
        Self::query_integrations(&conn, "WHERE user_id = ?", &[&user_id])
    }

    async fn list_all(&self) -> Result<Vec<Integration>> {
        let conn = self.conn()?;
        Self::query_integrations(&conn, "", &[])
    }

    async fn update(&self, integration: &Integration) -> Result<()> {
        let conn = self.conn()?;
        let rows = Self::write_integration(&conn, integration, None)?;
        if rows == 0 {
            return Err(Error::IntegrationNotFound(integration.id.to_string()));
        }
        Ok(())
    }

    async fn compare_and_set(
        &self,
        integration: &Integration,
        expected: IntegrationStatus,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let rows = Self::write_integration(&conn, integration, Some(expected))?;
        Ok(rows > 0)
    }
}

#[async_trait]
impl LedgerStore for DuckDbRepository {
    async fn upsert_by_external_id(&self, entry: &LedgerEntry) -> Result<UpsertOutcome> {
        self.upsert_entry(entry)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<LedgerEntry>> {
        let conn = self.conn()?;
        Self::find_entry(&conn, external_id)
    }

    async fn count_by_external_ids(&self, external_ids: &[String]) -> Result<usize> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; external_ids.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM sys_ledger_entries WHERE external_transaction_id IN ({})",
            placeholders
        );
        let conn = self.conn()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(external_ids.iter()), |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    async fn count_entries(&self, integration_id: Option<i64>) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = match integration_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM sys_ledger_entries WHERE integration_id = ?",
                params![id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM sys_ledger_entries", [], |row| {
                row.get(0)
            })?,
        };
        Ok(count as usize)
    }

    async fn distinct_account_count(&self, integration_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT account_ref) FROM sys_ledger_entries
             WHERE integration_id = ? AND account_ref IS NOT NULL",
            params![integration_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn entries_for_integration(
        &self,
        integration_id: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM sys_ledger_entries WHERE integration_id = ?
             ORDER BY entry_date DESC, created_at DESC LIMIT ?",
            LEDGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![integration_id, limit as i64], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SyncEventLog for DuckDbRepository {
    async fn record(&self, event: &SyncEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_sync_events (event_id, integration_id, sync_trigger, scope, success,
                                          processed, created, updated, skipped, failed, error,
                                          started_at, completed_at, error_kind, retry_after)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.id.to_string(),
                event.integration_id,
                event.trigger,
                event.scope,
                event.success,
                event.counts.processed as i64,
                event.counts.created as i64,
                event.counts.updated as i64,
                event.counts.skipped as i64,
                event.counts.failed as i64,
                event.error,
                format_timestamp(event.started_at),
                event.completed_at.map(format_timestamp),
                event.error_kind,
                event.retry_after.map(|secs| secs as i64),
            ],
        )?;
        Ok(())
    }

    async fn recent(&self, integration_id: Option<i64>, limit: usize) -> Result<Vec<SyncEvent>> {
        let conn = self.conn()?;
        let mut events = Vec::new();
        match integration_id {
            Some(id) => {
                let sql = format!(
                    "SELECT {} FROM sys_sync_events WHERE integration_id = ?
                     ORDER BY started_at DESC LIMIT ?",
                    EVENT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                for row in stmt.query_map(params![id, limit as i64], row_to_event)? {
                    events.push(row?);
                }
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM sys_sync_events ORDER BY started_at DESC LIMIT ?",
                    EVENT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                for row in stmt.query_map(params![limit as i64], row_to_event)? {
                    events.push(row?);
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl RateCache for DuckDbRepository {
    async fn store_rates(&self, rates: &ExchangeRates) -> Result<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(&rates.rates)?;
        conn.execute(
            "INSERT INTO sys_exchange_rates (base_currency, rate_date, rates, fetched_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (base_currency, rate_date) DO UPDATE SET
                rates = EXCLUDED.rates,
                fetched_at = EXCLUDED.fetched_at",
            params![
                rates.base,
                rates.date.to_string(),
                json,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    async fn load_rates(&self, base: &str, date: NaiveDate) -> Result<Option<ExchangeRates>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT base_currency, rate_date::VARCHAR, rates FROM sys_exchange_rates
                 WHERE base_currency = ? AND rate_date = ?",
                params![base.to_ascii_uppercase(), date.to_string()],
                row_to_rates,
            )
            .optional()?;
        Ok(row)
    }

    async fn latest_rates(&self, base: &str) -> Result<Option<ExchangeRates>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT base_currency, rate_date::VARCHAR, rates FROM sys_exchange_rates
                 WHERE base_currency = ? ORDER BY rate_date DESC LIMIT 1",
                params![base.to_ascii_uppercase()],
                row_to_rates,
            )
            .optional()?;
        Ok(row)
    }
}

// Row mapping

fn conversion_error(idx: usize, err: impl Into<Error>) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(idx, duckdb::types::Type::Text, Box::new(err.into()))
}

fn parse_column<T: FromStr<Err = Error>>(row: &duckdb::Row, idx: usize) -> duckdb::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn timestamp_column(row: &duckdb::Row, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn date_column(row: &duckdb::Row, idx: usize) -> duckdb::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
}

fn row_to_integration(row: &duckdb::Row) -> duckdb::Result<Integration> {
    // Column order follows INTEGRATION_COLUMNS
    let sync_status: Option<String> = row.get(14)?;
    Ok(Integration {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: parse_column(row, 2)?,
        provider_access_token: row.get(3)?,
        institution: Institution {
            id: row.get(4)?,
            name: row.get(5)?,
            logo_url: row.get(6)?,
            country: row.get(7)?,
        },
        status: parse_column(row, 8)?,
        error_message: row.get(9)?,
        error_code: row.get(10)?,
        consent_expiry_date: timestamp_column(row, 11)?,
        last_sync_at: timestamp_column(row, 12)?,
        last_successful_sync_at: timestamp_column(row, 13)?,
        sync_status: sync_status
            .map(|s| s.parse::<SyncStatus>())
            .transpose()
            .map_err(|e| conversion_error(14, e))?,
        accounts_count: row.get(15)?,
        transactions_count: row.get(16)?,
        last_transaction_date: date_column(row, 17)?,
        created_at: timestamp_column(row, 18)?.unwrap_or_else(Utc::now),
        updated_at: timestamp_column(row, 19)?.unwrap_or_else(Utc::now),
    })
}

fn row_to_entry(row: &duckdb::Row) -> duckdb::Result<LedgerEntry> {
    // Column order follows LEDGER_COLUMNS
    let id: String = row.get(0)?;
    let amount: String = row.get(3)?;
    let amounts: String = row.get(5)?;
    let rates: Option<String> = row.get(6)?;
    Ok(LedgerEntry {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, Error::database(e.to_string())))?,
        user_id: row.get(1)?,
        integration_id: row.get(2)?,
        amount: Decimal::from_str(&amount)
            .map(|d| d.normalize())
            .map_err(|e| conversion_error(3, Error::database(e.to_string())))?,
        currency: row.get(4)?,
        amounts: serde_json::from_str(&amounts).map_err(|e| conversion_error(5, e))?,
        exchange_rates: rates.and_then(|r| serde_json::from_str(&r).ok()),
        category: parse_column(row, 7)?,
        description: row.get(8)?,
        merchant: row.get(9)?,
        entry_type: parse_column(row, 10)?,
        source: parse_column(row, 11)?,
        entry_date: date_column(row, 12)?
            .ok_or_else(|| conversion_error(12, Error::database("missing entry date")))?,
        account_ref: row.get(13)?,
        external_transaction_id: row.get(14)?,
        created_at: timestamp_column(row, 15)?.unwrap_or_else(Utc::now),
        updated_at: timestamp_column(row, 16)?.unwrap_or_else(Utc::now),
    })
}

fn row_to_event(row: &duckdb::Row) -> duckdb::Result<SyncEvent> {
    // Column order follows EVENT_COLUMNS
    let id: String = row.get(0)?;
    let count = |idx: usize| -> duckdb::Result<usize> { Ok(row.get::<_, i64>(idx)?.max(0) as usize) };
    Ok(SyncEvent {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, Error::database(e.to_string())))?,
        integration_id: row.get(1)?,
        trigger: row.get(2)?,
        scope: row.get(3)?,
        success: row.get(4)?,
        counts: SyncCounts {
            processed: count(5)?,
            created: count(6)?,
            updated: count(7)?,
            skipped: count(8)?,
            failed: count(9)?,
        },
        error: row.get(10)?,
        started_at: timestamp_column(row, 11)?.unwrap_or_else(Utc::now),
        completed_at: timestamp_column(row, 12)?,
        error_kind: row.get(13)?,
        retry_after: row
            .get::<_, Option<i64>>(14)?
            .map(|secs| secs.max(0) as u64),
    })
}

fn row_to_rates(row: &duckdb::Row) -> duckdb::Result<ExchangeRates> {
    let base: String = row.get(0)?;
    let date = date_column(row, 1)?
        .ok_or_else(|| conversion_error(1, Error::database("missing rate date")))?;
    let json: String = row.get(2)?;
    let rates: std::collections::BTreeMap<String, Decimal> =
        serde_json::from_str(&json).map_err(|e| conversion_error(2, e))?;
    Ok(ExchangeRates::new(base, date, rates, RateOrigin::Live))
}

// Helper functions

/// Fixed-width UTC timestamps so string order matches time order
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
