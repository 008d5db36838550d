//! ledgersync core - bank-integration sync and webhook processing
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Integration, LedgerEntry, webhooks, etc.)
//! - **ports**: Trait definitions for external dependencies (stores, aggregator, rates)
//! - **services**: Business logic orchestration (sync, webhook dispatch)
//! - **adapters**: Concrete implementations (DuckDB, Belvo, Frankfurter)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::belvo::BelvoClient;
use adapters::duckdb::DuckDbRepository;
use adapters::frankfurter::FrankfurterClient;
use config::Config;
use ports::{RateSource, TransactionSource};
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::Error;
pub use domain::{
    Integration, IntegrationStatus, LedgerEntry, SyncEvent, SyncRequest, SyncResult, WebhookAck,
};

/// Database file inside the data directory
pub const DB_FILENAME: &str = "ledgersync.duckdb";

/// Main context for ledgersync operations
///
/// Holds the repository, configuration and every service, wired once.
pub struct LedgerSyncContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub integration_service: Arc<IntegrationService>,
    pub sync_orchestrator: Arc<SyncOrchestrator>,
    pub webhook_dispatcher: WebhookDispatcher,
    pub rate_provider: Arc<CachedRateProvider>,
    pub status_service: StatusService,
}

impl LedgerSyncContext {
    /// Open (or create) the data directory and wire the real adapters
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let config = Config::load(data_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&data_dir.join(DB_FILENAME))?);
        repository.ensure_schema()?;

        let source: Arc<dyn TransactionSource> = Arc::new(BelvoClient::new(&config.provider)?);
        let rate_source: Arc<dyn RateSource> = Arc::new(FrankfurterClient::new(&config.rates)?);

        Ok(Self::assemble(config, repository, source, rate_source))
    }

    /// Wire services around an already opened repository
    pub fn assemble(
        config: Config,
        repository: Arc<DuckDbRepository>,
        source: Arc<dyn TransactionSource>,
        rate_source: Arc<dyn RateSource>,
    ) -> Self {
        let rate_provider = Arc::new(CachedRateProvider::new(
            rate_source,
            repository.clone(),
            config.rates.base_currency.clone(),
            config.rates.fallback.clone(),
        ));

        let integration_service = Arc::new(IntegrationService::new(repository.clone()));

        let sync_orchestrator = Arc::new(SyncOrchestrator::new(
            repository.clone(),
            repository.clone(),
            repository.clone(),
            rate_provider.clone(),
            TransactionFetcher::new(source, config.provider.max_pages),
            TransactionConverter::new(config.rates.supported_currencies.clone()),
            config.rates.base_currency.clone(),
            config.sync.incremental_overlap_days,
        ));

        let verifier: Arc<dyn WebhookVerifier> = match &config.webhooks.shared_token {
            Some(token) if !token.is_empty() => Arc::new(SharedTokenVerifier::new(token.clone())),
            _ => Arc::new(AllowAll),
        };

        let webhook_dispatcher = WebhookDispatcher::new(
            integration_service.clone(),
            sync_orchestrator.clone(),
            repository.clone(),
            repository.clone(),
            verifier,
            config.webhooks.clone(),
        );

        let status_service =
            StatusService::new(repository.clone(), repository.clone(), repository.clone());

        Self {
            config,
            repository,
            integration_service,
            sync_orchestrator,
            webhook_dispatcher,
            rate_provider,
            status_service,
        }
    }
}
