//! Disconnect command - stop syncing an integration

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use ledgersync_core::IntegrationStatus;

use super::get_context;

pub async fn run(integration_id: i64, force: bool) -> Result<()> {
    let ctx = get_context()?;
    let integration = ctx.integration_service.get(integration_id).await?;

    if integration.status == IntegrationStatus::Disconnected {
        println!(
            "{}",
            format!("Integration {} is already disconnected", integration_id).dimmed()
        );
        return Ok(());
    }

    let name = integration
        .institution
        .name
        .clone()
        .unwrap_or_else(|| integration.institution.id.clone());

    if !force {
        println!(
            "\n{}",
            format!("This will disconnect integration {} ({}).", integration_id, name).yellow()
        );
        println!("{}\n", "Ledger entries already synced will remain.".dimmed());

        if !Confirm::new()
            .with_prompt("Are you sure?")
            .default(false)
            .interact()?
        {
            println!("{}\n", "Cancelled".dimmed());
            return Ok(());
        }
    }

    ctx.integration_service.disconnect(integration_id).await?;
    println!("\n{} Integration {} disconnected\n", "✓".green(), integration_id);

    Ok(())
}
