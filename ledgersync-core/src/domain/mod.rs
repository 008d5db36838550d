//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic and state transitions - no I/O.

mod integration;
mod ledger;
pub mod rates;
mod raw_transaction;
pub mod result;
mod sync_event;
pub mod webhook;

pub use integration::{
    mask_link_id, Institution, Integration, IntegrationStatus, Provider, SyncCompletion,
    SyncStatus, Transition,
};
pub use ledger::{Category, EntrySource, EntryType, LedgerEntry, UpsertKind, UpsertOutcome};
pub use rates::{ExchangeRates, RateOrigin};
pub use raw_transaction::{FlowDirection, RawStatus, RawTransaction};
pub use sync_event::{
    derive_sync_status, SyncCounts, SyncEvent, SyncRequest, SyncResult, SyncScope, SyncTrigger,
    SyncType, DATA_TYPE_TRANSACTIONS,
};
pub use webhook::{AckBody, AckStatus, WebhookAck, WebhookEnvelope, WebhookEvent};
