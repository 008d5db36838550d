//! Events command - show the sync audit log

use anyhow::Result;
use colored::Colorize;
use ledgersync_core::ports::SyncEventLog;

use super::get_context;
use crate::output;

pub async fn run(integration_id: Option<i64>, limit: usize, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let events = ctx.repository.recent(integration_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{}", "No sync events recorded.".dimmed());
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec![
        "Started",
        "Integration",
        "Trigger",
        "Scope",
        "Result",
        "New",
        "Updated",
        "Skipped",
        "Failed",
        "Error",
    ]);

    for event in &events {
        let result = if event.success {
            "ok".green().to_string()
        } else {
            "failed".red().to_string()
        };
        table.add_row(vec![
            output::format_time(Some(event.started_at)),
            event.integration_id.to_string(),
            event.trigger.clone(),
            event.scope.clone(),
            result,
            event.counts.created.to_string(),
            event.counts.updated.to_string(),
            event.counts.skipped.to_string(),
            event.counts.failed.to_string(),
            event.error.clone().unwrap_or_default(),
        ]);
    }

    println!("{}", table);
    Ok(())
}
