//! CLI command implementations

pub mod connect;
pub mod disconnect;
pub mod events;
pub mod expire;
pub mod list;
pub mod rates;
pub mod status;
pub mod sync;
pub mod webhook;

use std::path::PathBuf;

use anyhow::{Context, Result};
use ledgersync_core::LedgerSyncContext;

/// Get the data directory from environment or default
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LEDGERSYNC_DIR") {
        PathBuf::from(dir)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ledgersync")
    }
}

/// Open the data directory and wire every service
pub fn get_context() -> Result<LedgerSyncContext> {
    let data_dir = get_data_dir();
    LedgerSyncContext::new(&data_dir)
        .with_context(|| format!("Failed to open ledgersync data in {}", data_dir.display()))
}
