//! Integration service - connection lifecycle outside of syncs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::result::{Error, Result};
use crate::domain::{Institution, Integration, IntegrationStatus, Provider};
use crate::ports::IntegrationStore;

pub struct IntegrationService {
    store: Arc<dyn IntegrationStore>,
}

impl IntegrationService {
    pub fn new(store: Arc<dyn IntegrationStore>) -> Self {
        Self { store }
    }

    /// Register a link after the aggregator confirmed the widget handshake
    ///
    /// A link that is already known is reconnected in place, whatever state
    /// it was left in.
    pub async fn connect(
        &self,
        user_id: i64,
        provider: Provider,
        link_id: &str,
        institution: Institution,
    ) -> Result<Integration> {
        let link_id = link_id.trim();
        if link_id.is_empty() {
            return Err(Error::validation("Link id cannot be empty"));
        }

        if let Some(mut existing) = self.store.get_by_link(link_id).await? {
            if existing.provider != provider {
                return Err(Error::validation(format!(
                    "Link is registered with {}",
                    existing.provider.display_name()
                )));
            }
            if existing.status == IntegrationStatus::Syncing {
                return Err(Error::SyncConflict(existing.id));
            }
            if !institution.id.is_empty() {
                existing.institution = institution;
            }
            let transition = existing.confirm_connection();
            self.store.update(&existing).await?;
            info!(
                integration_id = existing.id,
                link_id = %existing.masked_link(),
                reconnected = transition.applied(),
                "integration reconnected"
            );
            return Ok(existing);
        }

        let mut integration = Integration::new(user_id, provider, institution, link_id);
        integration.confirm_connection();
        let created = self.store.create(&integration).await?;
        info!(
            integration_id = created.id,
            user_id,
            provider = provider.as_str(),
            link_id = %created.masked_link(),
            "integration connected"
        );
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<Integration> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::IntegrationNotFound(id.to_string()))
    }

    pub async fn get_by_link(&self, link_id: &str) -> Result<Option<Integration>> {
        self.store.get_by_link(link_id).await
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<Integration>> {
        self.store.list_for_user(user_id).await
    }

    pub async fn list_all(&self) -> Result<Vec<Integration>> {
        self.store.list_all().await
    }

    /// Integrations eligible for a sync right now
    pub async fn sync_candidates(&self) -> Result<Vec<Integration>> {
        Ok(self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(Integration::is_sync_candidate)
            .collect())
    }

    pub async fn disconnect(&self, id: i64) -> Result<Integration> {
        let mut integration = self.get(id).await?;
        if integration.disconnect().applied() {
            self.store.update(&integration).await?;
            info!(integration_id = id, "integration disconnected");
        }
        Ok(integration)
    }

    /// Move an integration to EXPIRED and persist it
    pub async fn expire_consent(
        &self,
        integration: &mut Integration,
        message: impl Into<String>,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let transition = integration.expire_consent(message, expiry);
        self.store.update(integration).await?;
        info!(
            integration_id = integration.id,
            link_id = %integration.masked_link(),
            status = %transition.status(),
            "consent expired"
        );
        Ok(())
    }

    /// Expire every integration whose consent date lies before `now`
    pub async fn expire_lapsed_consents(&self, now: DateTime<Utc>) -> Result<Vec<Integration>> {
        let mut expired = Vec::new();
        for mut integration in self.store.list_all().await? {
            if !integration.consent_lapsed(now)
                || matches!(
                    integration.status,
                    IntegrationStatus::Expired | IntegrationStatus::Disconnected
                )
            {
                continue;
            }
            let expiry = integration.consent_expiry_date;
            self.expire_consent(&mut integration, "Consent expired", expiry)
                .await?;
            expired.push(integration);
        }
        Ok(expired)
    }
}
