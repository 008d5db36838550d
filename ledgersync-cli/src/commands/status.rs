//! Status command - integration and ledger summary

use anyhow::Result;
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};

use super::get_context;
use crate::output;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let status = ctx.status_service.get_status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Sync Status".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec![
        "Integrations".to_string(),
        status.total_integrations.to_string(),
    ]);
    for (state, count) in &status.by_status {
        table.add_row(vec![format!("  {}", state), count.to_string()]);
    }
    table.add_row(vec![
        "Ledger entries".to_string(),
        status.total_entries.to_string(),
    ]);

    println!("{}", table);
    println!();

    if !status.needs_attention.is_empty() {
        println!("{}", "Needs Attention".bold());
        for item in &status.needs_attention {
            println!(
                "  • {} {} [{}] {}",
                item.id,
                item.institution,
                item.status.red(),
                item.error_message.as_deref().unwrap_or_default().dimmed()
            );
        }
        println!();
    }

    if !status.recent_failures.is_empty() {
        println!("{}", "Recent Failures".bold());
        for event in &status.recent_failures {
            println!(
                "  • {} integration {} ({}): {}",
                output::format_time(Some(event.started_at)),
                event.integration_id,
                event.trigger,
                event.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}
