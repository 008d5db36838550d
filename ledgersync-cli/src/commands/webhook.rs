//! Webhook command - feed one aggregator webhook through the dispatcher
//!
//! Prints the acknowledgment JSON on stdout. Lets a web front end, or an
//! operator replaying a delivery, reuse the exact intake path.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::get_context;

pub async fn run(file: Option<&Path>, authorization: Option<&str>) -> Result<()> {
    let body = match file {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None if atty::isnt(atty::Stream::Stdin) => {
            let mut body = Vec::new();
            std::io::stdin()
                .read_to_end(&mut body)
                .context("Failed to read webhook body from stdin")?;
            body
        }
        None => bail!("No webhook body. Pass a file or pipe the body on stdin."),
    };

    let ctx = get_context()?;
    let ack = ctx
        .webhook_dispatcher
        .inline()
        .dispatch(&body, authorization)
        .await;

    println!("{}", serde_json::to_string_pretty(&ack)?);

    if ack.status_code >= 400 {
        bail!("Webhook rejected with status {}", ack.status_code);
    }
    Ok(())
}
