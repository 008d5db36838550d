//! Status service - integration and ledger summaries

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::result::Result;
use crate::domain::{IntegrationStatus, SyncEvent};
use crate::ports::{IntegrationStore, LedgerStore, SyncEventLog};

/// How many recent failed sync events the summary carries
const RECENT_FAILURES: usize = 5;

pub struct StatusService {
    integrations: Arc<dyn IntegrationStore>,
    ledger: Arc<dyn LedgerStore>,
    events: Arc<dyn SyncEventLog>,
}

impl StatusService {
    pub fn new(
        integrations: Arc<dyn IntegrationStore>,
        ledger: Arc<dyn LedgerStore>,
        events: Arc<dyn SyncEventLog>,
    ) -> Self {
        Self {
            integrations,
            ledger,
            events,
        }
    }

    /// Get overall status summary
    pub async fn get_status(&self) -> Result<StatusSummary> {
        let integrations = self.integrations.list_all().await?;

        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for integration in &integrations {
            *by_status
                .entry(integration.status.as_str().to_string())
                .or_default() += 1;
        }

        let needs_attention = integrations
            .iter()
            .filter(|i| {
                matches!(
                    i.status,
                    IntegrationStatus::Error | IntegrationStatus::Expired
                )
            })
            .map(|i| IntegrationSummary {
                id: i.id,
                institution: i
                    .institution
                    .name
                    .clone()
                    .unwrap_or_else(|| i.institution.id.clone()),
                status: i.status.as_str().to_string(),
                error_message: i.error_message.clone(),
            })
            .collect();

        // recent() is newest first; scan a window and keep the failures
        let recent_failures: Vec<SyncEvent> = self
            .events
            .recent(None, RECENT_FAILURES * 10)
            .await?
            .into_iter()
            .filter(|e| !e.success)
            .take(RECENT_FAILURES)
            .collect();

        Ok(StatusSummary {
            total_integrations: integrations.len(),
            by_status,
            total_entries: self.ledger.count_entries(None).await?,
            needs_attention,
            recent_failures,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total_integrations: usize,
    pub by_status: BTreeMap<String, usize>,
    pub total_entries: usize,
    pub needs_attention: Vec<IntegrationSummary>,
    pub recent_failures: Vec<SyncEvent>,
}

#[derive(Debug, Serialize)]
pub struct IntegrationSummary {
    pub id: i64,
    pub institution: String,
    pub status: String,
    pub error_message: Option<String>,
}
