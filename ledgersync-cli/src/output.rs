//! Output formatting utilities

use chrono::{DateTime, Utc};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use ledgersync_core::IntegrationStatus;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Integration status, colored by how much attention it needs
pub fn status_label(status: IntegrationStatus) -> String {
    let label = status.as_str();
    match status {
        IntegrationStatus::Connected => label.green().to_string(),
        IntegrationStatus::Syncing | IntegrationStatus::Pending => label.cyan().to_string(),
        IntegrationStatus::Error | IntegrationStatus::Expired => label.red().to_string(),
        IntegrationStatus::Disconnected => label.dimmed().to_string(),
    }
}

/// Timestamp in local-agnostic short form, or a dash
pub fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
