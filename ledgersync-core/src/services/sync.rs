//! Sync orchestrator - one sync attempt for one integration
//!
//! The integration row's status is the lock: a sync starts only when the
//! CONNECTED -> SYNCING write wins, and every attempt that got that far
//! releases it with a guarded SYNCING -> CONNECTED/ERROR write. A status
//! set by someone else mid-sync (consent expiry, disconnect) is kept.
//! Pages are converted and upserted as they arrive; record-level failures
//! are counted and never abort the attempt.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{
    derive_sync_status, ExchangeRates, Integration, IntegrationStatus, SyncCompletion, SyncCounts,
    SyncEvent, SyncRequest, SyncResult, SyncScope, SyncTrigger, SyncType, UpsertKind,
    DATA_TYPE_TRANSACTIONS,
};
use crate::ports::{IntegrationStore, LedgerStore, RateProvider, SyncEventLog};
use crate::services::converter::{Conversion, TransactionConverter};
use crate::services::fetcher::TransactionFetcher;

/// Attempts at recording a finished sync before giving up
const FINISH_ATTEMPTS: u32 = 3;
const FINISH_BACKOFF: StdDuration = StdDuration::from_millis(50);

pub struct SyncOrchestrator {
    integrations: Arc<dyn IntegrationStore>,
    ledger: Arc<dyn LedgerStore>,
    events: Arc<dyn SyncEventLog>,
    rates: Arc<dyn RateProvider>,
    fetcher: TransactionFetcher,
    converter: TransactionConverter,
    base_currency: String,
    overlap_days: i64,
}

/// Running totals of one attempt
#[derive(Default)]
struct Progress {
    counts: SyncCounts,
    latest_date: Option<NaiveDate>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        integrations: Arc<dyn IntegrationStore>,
        ledger: Arc<dyn LedgerStore>,
        events: Arc<dyn SyncEventLog>,
        rates: Arc<dyn RateProvider>,
        fetcher: TransactionFetcher,
        converter: TransactionConverter,
        base_currency: impl Into<String>,
        overlap_days: i64,
    ) -> Self {
        Self {
            integrations,
            ledger,
            events,
            rates,
            fetcher,
            converter,
            base_currency: base_currency.into(),
            overlap_days: overlap_days.max(0),
        }
    }

    /// Manual sync with a full or incremental window
    pub async fn sync(
        &self,
        integration_id: i64,
        trigger: SyncTrigger,
        request: &SyncRequest,
    ) -> Result<SyncResult> {
        let warnings: Vec<String> = request
            .data_types
            .iter()
            .filter(|t| !t.eq_ignore_ascii_case(DATA_TYPE_TRANSACTIONS))
            .map(|t| format!("Data type '{}' is not supported and was skipped", t))
            .collect();
        if warnings.len() == request.data_types.len() && !request.data_types.is_empty() {
            return Err(Error::validation(format!(
                "No supported data types requested (supported: {})",
                DATA_TYPE_TRANSACTIONS
            )));
        }

        let scope = match request.sync_type {
            SyncType::Full => SyncScope::everything(),
            SyncType::Incremental => {
                let integration = self.load(integration_id).await?;
                self.incremental_scope(&integration)
            }
        };

        let mut result = self.run(integration_id, trigger, scope).await?;
        result.warnings.extend(warnings);
        Ok(result)
    }

    /// Sync an explicit scope (webhook handlers)
    pub async fn sync_scope(
        &self,
        integration_id: i64,
        trigger: SyncTrigger,
        scope: SyncScope,
    ) -> Result<SyncResult> {
        self.run(integration_id, trigger, scope).await
    }

    /// Window from the last known transaction minus the overlap, to today
    fn incremental_scope(&self, integration: &Integration) -> SyncScope {
        match integration.last_transaction_date {
            Some(last) => SyncScope::Range {
                date_from: Some(last - Duration::days(self.overlap_days)),
                date_to: Some(Utc::now().date_naive()),
            },
            None => SyncScope::everything(),
        }
    }

    async fn load(&self, integration_id: i64) -> Result<Integration> {
        self.integrations
            .get(integration_id)
            .await?
            .ok_or_else(|| Error::IntegrationNotFound(integration_id.to_string()))
    }

    /// Load, check state and take the sync lock
    async fn acquire(&self, integration_id: i64) -> Result<Integration> {
        let mut integration = self.load(integration_id).await?;

        if integration.status == IntegrationStatus::Connected
            && integration.consent_lapsed(Utc::now())
        {
            let expiry = integration.consent_expiry_date;
            integration.expire_consent("Consent expired", expiry);
            self.integrations.update(&integration).await?;
            warn!(
                integration_id,
                link_id = %integration.masked_link(),
                "consent lapsed, integration expired"
            );
        }

        match integration.status {
            IntegrationStatus::Connected => {}
            IntegrationStatus::Syncing => return Err(Error::SyncConflict(integration_id)),
            status => {
                return Err(Error::InvalidState {
                    id: integration_id,
                    status,
                    expected: IntegrationStatus::Connected,
                })
            }
        }

        integration.begin_sync();
        if !self
            .integrations
            .compare_and_set(&integration, IntegrationStatus::Connected)
            .await?
        {
            return Err(Error::SyncConflict(integration_id));
        }
        Ok(integration)
    }

    async fn run(
        &self,
        integration_id: i64,
        trigger: SyncTrigger,
        scope: SyncScope,
    ) -> Result<SyncResult> {
        let integration = self.acquire(integration_id).await?;
        let started_at = Utc::now();
        let clock = Instant::now();

        info!(
            integration_id,
            link_id = %integration.masked_link(),
            trigger = %trigger,
            scope = scope.kind(),
            source = self.fetcher.source_name(),
            "sync started"
        );

        // one snapshot per attempt; without one every record fails on its own
        let rates = self
            .rates
            .get_rates(&self.base_currency)
            .await
            .map_err(|e| {
                warn!(integration_id, error = %e, "exchange rates unavailable");
                e.to_string()
            });

        let mut progress = Progress::default();
        let mut fetch_error: Option<Error> = None;
        let mut pages = self
            .fetcher
            .pages(&integration.provider_access_token, &scope);

        loop {
            let page = match pages.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    fetch_error = Some(e);
                    break;
                }
            };

            progress.counts.processed +=
                page.transactions.len() + page.invalid + page.duplicates;
            progress.counts.failed += page.invalid;
            progress.counts.skipped += page.duplicates;

            let mut aborted = false;
            for raw in &page.transactions {
                if let Err(e) = self
                    .ingest(&integration, raw, &rates, &mut progress)
                    .await
                {
                    fetch_error = Some(e);
                    aborted = true;
                    break;
                }
            }
            if aborted {
                break;
            }
        }

        let fetch_succeeded = fetch_error.is_none();
        let capped = pages.capped();
        let counts = progress.counts;
        let sync_status = derive_sync_status(fetch_succeeded, &counts, capped);
        let mut warnings = Vec::new();
        if capped {
            warnings.push(format!(
                "Stopped after {} pages; remaining transactions were not fetched",
                pages.pages()
            ));
        }
        let error_message = fetch_error.as_ref().map(|e| e.to_string());
        let error_kind = fetch_error.as_ref().map(|e| e.kind().to_string());
        let retry_after = fetch_error.as_ref().and_then(Error::retry_after);

        let result = SyncResult {
            integration_id,
            trigger: trigger.as_str().to_string(),
            scope: scope.kind().to_string(),
            success: fetch_succeeded,
            sync_status,
            counts,
            pages: pages.pages(),
            capped,
            duration_ms: clock.elapsed().as_millis() as u64,
            warnings,
            error: error_message.clone(),
            error_kind,
            retry_after,
            started_at,
            completed_at: Utc::now(),
        };

        if let Err(e) = self.events.record(&SyncEvent::from_result(&result)).await {
            warn!(integration_id, error = %e, "failed to record sync event");
        }

        self.finish(integration_id, &result, progress.latest_date)
            .await?;

        if fetch_succeeded {
            info!(
                integration_id,
                processed = counts.processed,
                created = counts.created,
                updated = counts.updated,
                skipped = counts.skipped,
                failed = counts.failed,
                pages = result.pages,
                duration_ms = result.duration_ms,
                status = %sync_status.as_str(),
                "sync completed"
            );
        } else {
            error!(
                integration_id,
                created = counts.created,
                updated = counts.updated,
                error_kind = result.error_kind.as_deref().unwrap_or_default(),
                retry_after = ?result.retry_after,
                error = result.error.as_deref().unwrap_or_default(),
                "sync failed"
            );
        }

        Ok(result)
    }

    /// Convert and upsert one record
    ///
    /// Record-level failures are counted; anything else is returned and ends
    /// the attempt.
    async fn ingest(
        &self,
        integration: &Integration,
        raw: &crate::domain::RawTransaction,
        rates: &std::result::Result<ExchangeRates, String>,
        progress: &mut Progress,
    ) -> Result<()> {
        let rates = match rates {
            Ok(rates) => rates,
            Err(message) => {
                progress.counts.failed += 1;
                warn!(transaction_id = %raw.id, reason = %message, "transaction not converted");
                return Ok(());
            }
        };

        let entry = match self.converter.convert(raw, integration, rates) {
            Ok(Conversion::Entry(entry)) => entry,
            Ok(Conversion::Skipped(_)) => {
                progress.counts.skipped += 1;
                return Ok(());
            }
            Err(e) if e.is_record_level() => {
                progress.counts.failed += 1;
                warn!(transaction_id = %raw.id, error = %e, "transaction not converted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let outcome = self.ledger.upsert_by_external_id(&entry).await?;
        match outcome.kind {
            UpsertKind::Created => progress.counts.created += 1,
            UpsertKind::Updated => progress.counts.updated += 1,
        }
        progress.latest_date = progress.latest_date.max(Some(entry.entry_date));
        Ok(())
    }

    /// Record the outcome and release the sync lock
    ///
    /// The completion is written with a SYNCING -> * compare-and-set on a
    /// fresh copy, so an expiry or disconnect that landed mid-sync is kept.
    /// Store failures are retried; only when every attempt fails is the
    /// error returned and the integration left SYNCING.
    async fn finish(
        &self,
        integration_id: i64,
        result: &SyncResult,
        latest_date: Option<NaiveDate>,
    ) -> Result<()> {
        let accounts_count = match self.ledger.distinct_account_count(integration_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(integration_id, error = %e, "failed to count accounts");
                None
            }
        };
        let completion = SyncCompletion {
            fetch_succeeded: result.success,
            sync_status: Some(result.sync_status),
            error_message: result.error.clone(),
            error_code: result.error_kind.clone(),
            transactions_created: result.counts.created as i64,
            accounts_count,
            last_transaction_date: latest_date,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_completion(integration_id, &completion).await {
                Ok(true) => return Ok(()),
                Ok(false) if attempt < FINISH_ATTEMPTS => {
                    debug!(integration_id, attempt, "integration changed while finishing, retrying");
                }
                Ok(false) => {
                    warn!(integration_id, "integration kept changing; sync bookkeeping dropped");
                    return Ok(());
                }
                Err(e) if attempt < FINISH_ATTEMPTS => {
                    warn!(integration_id, attempt, error = %e, "failed to record sync completion, retrying");
                    tokio::time::sleep(FINISH_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(integration_id, error = %e, "sync completion not recorded; integration left SYNCING");
                    return Err(e);
                }
            }
        }
    }

    /// One guarded write of the completion; false when another writer raced us
    async fn write_completion(&self, integration_id: i64, completion: &SyncCompletion) -> Result<bool> {
        let mut current = self.load(integration_id).await?;

        if current.status == IntegrationStatus::Syncing {
            current.complete_sync(completion.clone());
            return self
                .integrations
                .compare_and_set(&current, IntegrationStatus::Syncing)
                .await;
        }

        // Status moved during the sync: keep it, record bookkeeping only
        let kept = current.status;
        current.complete_sync(completion.clone());
        debug!(integration_id, status = %kept, "status changed mid-sync; recording bookkeeping only");
        self.integrations.compare_and_set(&current, kept).await
    }
}
