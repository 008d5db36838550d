//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod data_provider;
mod rates;
mod repository;

pub use data_provider::{PageCursor, TransactionPage, TransactionSource};
pub use rates::{RateProvider, RateSource};
pub use repository::{IntegrationStore, LedgerStore, RateCache, SyncEventLog};
