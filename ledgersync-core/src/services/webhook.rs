//! Webhook dispatcher - intake, routing and the five event handlers
//!
//! Every parseable webhook is acknowledged with 202, whatever happens
//! downstream: unknown links, unsupported codes and handler failures are
//! logged and reflected in integration state, never bounced back to the
//! aggregator. Only an unparseable body (400) or a rejected verifier (401)
//! produce something else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::WebhookSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{
    mask_link_id, AckStatus, Integration, SyncEvent, SyncResult, SyncScope, SyncTrigger,
    WebhookAck, WebhookEnvelope, WebhookEvent,
};
use crate::ports::{LedgerStore, SyncEventLog};
use crate::services::integration::IntegrationService;
use crate::services::sync::SyncOrchestrator;

/// Decides whether an inbound request may be processed
pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, authorization: Option<&str>, body: &[u8]) -> bool;
}

/// Accepts every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl WebhookVerifier for AllowAll {
    fn verify(&self, _authorization: Option<&str>, _body: &[u8]) -> bool {
        true
    }
}

/// Compares the Authorization header with a configured token
///
/// Both `Bearer <token>` and the bare token are accepted.
#[derive(Debug, Clone)]
pub struct SharedTokenVerifier {
    token: String,
}

impl SharedTokenVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl WebhookVerifier for SharedTokenVerifier {
    fn verify(&self, authorization: Option<&str>, _body: &[u8]) -> bool {
        let Some(header) = authorization.map(str::trim) else {
            return false;
        };
        let presented = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .unwrap_or(header)
            .trim();
        !self.token.is_empty() && constant_time_eq(presented.as_bytes(), self.token.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// What a handler did
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// A sync ran (it may still have failed at the fetch level)
    Synced(SyncResult),
    /// Nothing to fetch
    NoWork(String),
    /// Deletion reported; nothing removed
    DeletionAudited { reported: usize, matched: usize },
    ConsentExpired,
}

impl HandlerOutcome {
    fn summary(&self) -> String {
        match self {
            HandlerOutcome::Synced(result) => format!(
                "{}: processed {}, created {}, updated {}, failed {}",
                result.sync_status,
                result.counts.processed,
                result.counts.created,
                result.counts.updated,
                result.counts.failed
            ),
            HandlerOutcome::NoWork(reason) => reason.clone(),
            HandlerOutcome::DeletionAudited { reported, matched } => format!(
                "deletion of {} transactions logged ({} known), nothing removed",
                reported, matched
            ),
            HandlerOutcome::ConsentExpired => "integration marked expired".to_string(),
        }
    }
}

/// Entry point for aggregator webhooks
#[derive(Clone)]
pub struct WebhookDispatcher {
    integrations: Arc<IntegrationService>,
    orchestrator: Arc<SyncOrchestrator>,
    ledger: Arc<dyn LedgerStore>,
    events: Arc<dyn SyncEventLog>,
    verifier: Arc<dyn WebhookVerifier>,
    settings: Arc<WebhookSettings>,
}

impl WebhookDispatcher {
    pub fn new(
        integrations: Arc<IntegrationService>,
        orchestrator: Arc<SyncOrchestrator>,
        ledger: Arc<dyn LedgerStore>,
        events: Arc<dyn SyncEventLog>,
        verifier: Arc<dyn WebhookVerifier>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            integrations,
            orchestrator,
            ledger,
            events,
            verifier,
            settings: Arc::new(settings),
        }
    }

    /// Same dispatcher with background processing turned off
    ///
    /// For one-shot callers that exit right after the ack.
    pub fn inline(&self) -> Self {
        let mut settings = (*self.settings).clone();
        settings.process_in_background = false;
        Self {
            settings: Arc::new(settings),
            ..self.clone()
        }
    }

    /// Process one webhook body and build the acknowledgment
    pub async fn dispatch(&self, body: &[u8], authorization: Option<&str>) -> WebhookAck {
        if !self.verifier.verify(authorization, body) {
            warn!("webhook rejected by verifier");
            return WebhookAck::unauthorized();
        }

        let envelope = match WebhookEnvelope::parse(body) {
            Ok(envelope) => envelope,
            Err(Error::MalformedWebhook {
                message,
                request_id,
            }) => {
                warn!(request_id = ?request_id, error = %message, "malformed webhook");
                return WebhookAck::malformed(request_id, message);
            }
            Err(e) => return WebhookAck::malformed(None, e.to_string()),
        };

        info!(
            webhook_id = %envelope.webhook_id,
            webhook_type = %envelope.webhook_type,
            webhook_code = %envelope.webhook_code,
            link_id = %mask_link_id(&envelope.link_id),
            "webhook received"
        );

        if !envelope.in_family(&self.settings.event_families) {
            debug!(webhook_type = %envelope.webhook_type, "webhook type not handled");
            return WebhookAck::acknowledged(
                &envelope,
                AckStatus::Ignored,
                Some(format!("webhook type '{}' not handled", envelope.webhook_type)),
            );
        }

        let integration = match self.integrations.get_by_link(&envelope.link_id).await {
            Ok(Some(integration)) => integration,
            Ok(None) => {
                warn!(
                    link_id = %mask_link_id(&envelope.link_id),
                    webhook_code = %envelope.webhook_code,
                    "no integration for webhook link"
                );
                return WebhookAck::acknowledged(
                    &envelope,
                    AckStatus::NotFound,
                    Some("integration not found, ignored".to_string()),
                );
            }
            Err(e) => {
                error!(error = %e, "integration lookup failed");
                return WebhookAck::acknowledged(&envelope, AckStatus::Error, Some(e.to_string()));
            }
        };

        let event = envelope.event();
        if let WebhookEvent::Unsupported(code) = &event {
            debug!(webhook_code = %code, "unsupported webhook code");
            return WebhookAck::acknowledged(
                &envelope,
                AckStatus::Ignored,
                Some(format!("webhook code '{}' not handled", code)),
            );
        }

        if self.settings.process_in_background {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle_logged(integration, event).await;
            });
            return WebhookAck::acknowledged(&envelope, AckStatus::Accepted, None);
        }

        match self.handle_logged(integration, event).await {
            Some(outcome) => {
                WebhookAck::acknowledged(&envelope, AckStatus::Processed, Some(outcome.summary()))
            }
            None => WebhookAck::acknowledged(
                &envelope,
                AckStatus::Error,
                Some("handler failed; see integration status".to_string()),
            ),
        }
    }

    async fn handle_logged(
        &self,
        integration: Integration,
        event: WebhookEvent,
    ) -> Option<HandlerOutcome> {
        let integration_id = integration.id;
        let code = event.code().to_string();
        match self.handle(integration, event).await {
            Ok(outcome) => {
                if let HandlerOutcome::Synced(result) = &outcome {
                    if !result.success {
                        warn!(
                            integration_id,
                            webhook_code = %code,
                            error_kind = result.error_kind.as_deref().unwrap_or_default(),
                            retry_after = ?result.retry_after,
                            error = result.error.as_deref().unwrap_or_default(),
                            "webhook sync failed"
                        );
                    }
                }
                Some(outcome)
            }
            Err(e) => {
                error!(integration_id, webhook_code = %code, error = %e, "webhook handler failed");
                None
            }
        }
    }

    /// Route an event to its handler
    pub async fn handle(
        &self,
        integration: Integration,
        event: WebhookEvent,
    ) -> Result<HandlerOutcome> {
        let trigger = SyncTrigger::Webhook(event.code().to_string());
        match event {
            WebhookEvent::HistoricalUpdate { date_from, date_to } => {
                self.sync_with_retry(&integration, trigger, SyncScope::Range { date_from, date_to })
                    .await
            }
            WebhookEvent::NewTransactionsAvailable {
                new_transactions,
                transaction_ids,
            } => {
                if !transaction_ids.is_empty() {
                    self.sync_with_retry(&integration, trigger, SyncScope::Ids(transaction_ids))
                        .await
                } else if new_transactions == Some(0) {
                    Ok(HandlerOutcome::NoWork(
                        "no new transactions reported".to_string(),
                    ))
                } else {
                    self.sync_with_retry(&integration, trigger, SyncScope::everything())
                        .await
                }
            }
            WebhookEvent::TransactionsUpdated { transaction_ids } => {
                if transaction_ids.is_empty() {
                    return Ok(HandlerOutcome::NoWork(
                        "no updated transaction ids reported".to_string(),
                    ));
                }
                self.sync_with_retry(&integration, trigger, SyncScope::Ids(transaction_ids))
                    .await
            }
            WebhookEvent::TransactionsDeleted { transaction_ids } => {
                self.audit_deletion(&integration, &trigger, &transaction_ids)
                    .await
            }
            WebhookEvent::ConsentExpired {
                institution,
                consent_id,
                expires_at,
            } => {
                self.expire(integration, institution, consent_id, expires_at)
                    .await
            }
            WebhookEvent::Unsupported(code) => Ok(HandlerOutcome::NoWork(format!(
                "webhook code '{}' not handled",
                code
            ))),
        }
    }

    /// Run a sync, retrying while another sync holds the integration
    async fn sync_with_retry(
        &self,
        integration: &Integration,
        trigger: SyncTrigger,
        scope: SyncScope,
    ) -> Result<HandlerOutcome> {
        let mut attempt = 0;
        loop {
            match self
                .orchestrator
                .sync_scope(integration.id, trigger.clone(), scope.clone())
                .await
            {
                Ok(result) => return Ok(HandlerOutcome::Synced(result)),
                Err(Error::SyncConflict(id)) if attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    debug!(
                        integration_id = id,
                        attempt,
                        "sync in progress, retrying after backoff"
                    );
                    tokio::time::sleep(self.settings.conflict_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn audit_deletion(
        &self,
        integration: &Integration,
        trigger: &SyncTrigger,
        transaction_ids: &[String],
    ) -> Result<HandlerOutcome> {
        let matched = self.ledger.count_by_external_ids(transaction_ids).await?;
        info!(
            integration_id = integration.id,
            reported = transaction_ids.len(),
            matched,
            "aggregator reported deleted transactions; ledger left unchanged"
        );
        let detail = format!(
            "{} transactions reported deleted ({} in ledger): {}",
            transaction_ids.len(),
            matched,
            transaction_ids.join(",")
        );
        self.events
            .record(&SyncEvent::audit(integration.id, trigger, detail))
            .await?;
        Ok(HandlerOutcome::DeletionAudited {
            reported: transaction_ids.len(),
            matched,
        })
    }

    async fn expire(
        &self,
        mut integration: Integration,
        institution: Option<String>,
        consent_id: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<HandlerOutcome> {
        let institution = institution
            .or_else(|| integration.institution.name.clone())
            .unwrap_or_else(|| integration.institution.id.clone());
        let message = match consent_id {
            Some(consent) => format!(
                "Consent expired for institution {} (consent {})",
                institution, consent
            ),
            None => format!("Consent expired for institution {}", institution),
        };
        self.integrations
            .expire_consent(&mut integration, message, expires_at)
            .await?;
        Ok(HandlerOutcome::ConsentExpired)
    }
}
