//! Rates command - show the exchange-rate snapshot used for conversion

use anyhow::Result;
use colored::Colorize;
use ledgersync_core::domain::RateOrigin;
use ledgersync_core::ports::RateProvider;

use super::get_context;
use crate::output;

pub async fn run(base: Option<String>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let base = base
        .map(|b| b.trim().to_ascii_uppercase())
        .unwrap_or_else(|| ctx.config.rates.base_currency.clone());

    let rates = ctx
        .rate_provider
        .get_rates(&base)
        .await?
        .restricted_to(&ctx.config.rates.supported_currencies);

    if json {
        println!("{}", serde_json::to_string_pretty(&rates)?);
        return Ok(());
    }

    println!("{} {} ({})", "Rates for".bold(), rates.base.bold(), rates.date);
    match rates.origin {
        RateOrigin::Live => {}
        RateOrigin::Stale => output::warning("Live rates unavailable; showing the last stored snapshot"),
        RateOrigin::Fallback => output::warning("Live rates unavailable; showing configured fallback rates"),
    }
    println!();

    let mut table = output::create_table();
    table.set_header(vec!["Currency", "Rate"]);
    for (currency, rate) in &rates.rates {
        table.add_row(vec![currency.clone(), rate.normalize().to_string()]);
    }
    println!("{}", table);

    Ok(())
}
