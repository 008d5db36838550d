//! Connect command - register a link created by the aggregator widget

use anyhow::Result;
use colored::Colorize;
use ledgersync_core::domain::{Institution, Provider};

use super::get_context;
use crate::output;

pub struct ConnectArgs {
    pub link_id: String,
    pub institution: String,
    pub institution_name: Option<String>,
    pub country: Option<String>,
    pub user_id: i64,
    pub provider: String,
    pub json: bool,
}

pub async fn run(args: ConnectArgs) -> Result<()> {
    let provider: Provider = args.provider.parse()?;
    let ctx = get_context()?;

    let integration = ctx
        .integration_service
        .connect(
            args.user_id,
            provider,
            &args.link_id,
            Institution {
                id: args.institution,
                name: args.institution_name,
                logo_url: None,
                country: args.country,
            },
        )
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&integration)?);
        return Ok(());
    }

    output::success(&format!(
        "Connected integration {} ({})",
        integration.id,
        integration
            .institution
            .name
            .as_deref()
            .unwrap_or(&integration.institution.id)
    ));
    println!("  Provider: {}", integration.provider.display_name());
    println!("  Link: {}", integration.masked_link().dimmed());
    println!(
        "  Status: {}",
        output::status_label(integration.status)
    );
    println!();
    println!(
        "{}",
        format!("Run 'lsync sync {}' to pull transactions.", integration.id).dimmed()
    );

    Ok(())
}
