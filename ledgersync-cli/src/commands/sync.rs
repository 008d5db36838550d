//! Sync command - pull transactions from the aggregator

use anyhow::{bail, Result};
use colored::Colorize;
use ledgersync_core::domain::{SyncRequest, SyncTrigger, SyncType};
use ledgersync_core::SyncResult;
use serde::Serialize;

use super::get_context;

#[derive(Serialize)]
struct SyncReport {
    integration_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<SyncResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn run(
    integration_id: Option<i64>,
    incremental: bool,
    data_types: Vec<String>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let request = SyncRequest {
        sync_type: if incremental {
            SyncType::Incremental
        } else {
            SyncType::Full
        },
        data_types,
    };

    let ids: Vec<i64> = match integration_id {
        Some(id) => vec![id],
        None => ctx
            .integration_service
            .sync_candidates()
            .await?
            .iter()
            .map(|i| i.id)
            .collect(),
    };

    let mut reports = Vec::with_capacity(ids.len());
    for id in ids {
        let report = match ctx
            .sync_orchestrator
            .sync(id, SyncTrigger::Manual, &request)
            .await
        {
            Ok(result) => SyncReport {
                integration_id: id,
                result: Some(result),
                error: None,
            },
            Err(e) => SyncReport {
                integration_id: id,
                result: None,
                error: Some(e.to_string()),
            },
        };
        reports.push(report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }

    // a single explicit integration that could not sync is a failed command
    if integration_id.is_some() {
        if let Some(error) = reports.first().and_then(|r| r.error.as_ref()) {
            bail!("Sync failed: {}", error);
        }
    }
    Ok(())
}

fn print_reports(reports: &[SyncReport]) {
    if reports.is_empty() {
        println!(
            "{}",
            "No connected integrations. Use 'lsync connect' to add one.".yellow()
        );
        return;
    }

    for report in reports {
        match (&report.result, &report.error) {
            (Some(result), _) => print_result(result),
            (None, Some(error)) => {
                println!(
                    "{} integration {} - {}",
                    "Error:".red(),
                    report.integration_id,
                    error
                );
            }
            (None, None) => {}
        }
        println!();
    }
}

fn print_result(result: &SyncResult) {
    let label = if result.success {
        "Synced:".green()
    } else {
        "Failed:".red()
    };
    println!(
        "{} integration {} ({}, {})",
        label,
        result.integration_id,
        result.scope,
        result.sync_status.as_str()
    );
    println!("  Pages fetched: {}", result.pages);
    println!("  Transaction breakdown:");
    println!("    Processed: {}", result.counts.processed);
    println!("    New: {}", result.counts.created);
    println!("    Updated: {}", result.counts.updated);
    println!("    Skipped: {}", result.counts.skipped);
    println!("    Failed: {}", result.counts.failed);
    println!("  Duration: {} ms", result.duration_ms);
    for warning in &result.warnings {
        println!("  {} {}", "Warning:".yellow(), warning);
    }
    if let Some(error) = &result.error {
        println!("  {} {}", "Error:".red(), error);
    }
    if let Some(seconds) = result.retry_after {
        println!("  {} retry after {}s", "Rate limited:".yellow(), seconds);
    }
}
