//! Expire-consents command - sweep integrations whose consent lapsed

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;

use super::get_context;
use crate::output;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let expired = ctx
        .integration_service
        .expire_lapsed_consents(Utc::now())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&expired)?);
        return Ok(());
    }

    if expired.is_empty() {
        println!("{}", "No lapsed consents.".dimmed());
        return Ok(());
    }

    for integration in &expired {
        output::info(&format!(
            "Expired integration {} (consent ended {})",
            integration.id,
            output::format_time(integration.consent_expiry_date)
        ));
    }
    output::success(&format!("{} integration(s) expired", expired.len()));

    Ok(())
}
