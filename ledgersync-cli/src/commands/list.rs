//! List command - show integrations

use anyhow::Result;
use colored::Colorize;

use super::get_context;
use crate::output;

pub async fn run(user_id: Option<i64>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let integrations = match user_id {
        Some(user_id) => ctx.integration_service.list_for_user(user_id).await?,
        None => ctx.integration_service.list_all().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&integrations)?);
        return Ok(());
    }

    if integrations.is_empty() {
        println!(
            "{}",
            "No integrations. Use 'lsync connect' to add one.".yellow()
        );
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec![
        "ID",
        "User",
        "Institution",
        "Link",
        "Status",
        "Last sync",
        "Result",
        "Transactions",
    ]);

    for integration in &integrations {
        table.add_row(vec![
            integration.id.to_string(),
            integration.user_id.to_string(),
            integration
                .institution
                .name
                .clone()
                .unwrap_or_else(|| integration.institution.id.clone()),
            integration.masked_link(),
            output::status_label(integration.status),
            output::format_time(integration.last_sync_at),
            integration
                .sync_status
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| "-".to_string()),
            integration.transactions_count.to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}
