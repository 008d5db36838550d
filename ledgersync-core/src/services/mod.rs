//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod category;
pub mod converter;
pub mod fetcher;
mod integration;
pub mod migration;
mod rates;
mod status;
mod sync;
pub mod webhook;

pub use category::CategoryMapper;
pub use converter::{Conversion, SkipReason, TransactionConverter};
pub use fetcher::{FetchOutcome, FetchedPage, Pages, TransactionFetcher};
pub use integration::IntegrationService;
pub use migration::{MigrationResult, MigrationService};
pub use rates::CachedRateProvider;
pub use status::{IntegrationSummary, StatusService, StatusSummary};
pub use sync::SyncOrchestrator;
pub use webhook::{
    AllowAll, HandlerOutcome, SharedTokenVerifier, WebhookDispatcher, WebhookVerifier,
};
