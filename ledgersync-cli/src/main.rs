//! ledgersync CLI - operate bank integrations from the terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{connect, disconnect, events, expire, list, rates, status, sync, webhook};
use ledgersync_core::config::{Config, ENV_LOG};

/// lsync - bank-integration sync and webhook intake
#[derive(Parser)]
#[command(name = "lsync", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a link created by the aggregator widget
    Connect {
        /// Aggregator link id
        link_id: String,
        /// Institution code, e.g. erebor_mx_retail
        #[arg(long)]
        institution: String,
        /// Institution display name
        #[arg(long)]
        institution_name: Option<String>,
        /// Institution country (ISO code)
        #[arg(long)]
        country: Option<String>,
        /// Owning user
        #[arg(long, default_value_t = 1)]
        user_id: i64,
        /// Aggregator (belvo, plaid)
        #[arg(long, default_value = "belvo")]
        provider: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List integrations
    List {
        /// Only integrations of this user
        #[arg(long)]
        user_id: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show integration and ledger summary
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pull transactions for one integration, or every connected one
    Sync {
        /// Integration id (optional, syncs all connected if not specified)
        integration_id: Option<i64>,
        /// Only fetch since the last known transaction
        #[arg(long)]
        incremental: bool,
        /// Data types to sync
        #[arg(long = "data-type", value_delimiter = ',', default_value = "transactions")]
        data_types: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Process one aggregator webhook and print the acknowledgment
    Webhook {
        /// File holding the webhook body (reads stdin if omitted)
        file: Option<PathBuf>,
        /// Authorization header value sent with the webhook
        #[arg(long, env = "LEDGERSYNC_WEBHOOK_AUTH")]
        authorization: Option<String>,
    },

    /// Disconnect an integration
    Disconnect {
        /// Integration id
        integration_id: i64,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Show the sync audit log
    Events {
        /// Only events of this integration
        #[arg(long)]
        integration_id: Option<i64>,
        /// Number of events to show
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the exchange rates used for conversion
    Rates {
        /// Base currency (defaults to the configured one)
        #[arg(long)]
        base: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Expire integrations whose consent date has passed
    ExpireConsents {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so JSON output on stdout stays parseable
fn init_tracing() {
    let level = std::env::var(ENV_LOG).ok().unwrap_or_else(|| {
        Config::load(&commands::get_data_dir())
            .map(|c| c.log_level)
            .unwrap_or_else(|_| "info".to_string())
    });
    let filter = EnvFilter::try_new(format!("ledgersync_core={level},lsync={level}", level = level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Connect {
            link_id,
            institution,
            institution_name,
            country,
            user_id,
            provider,
            json,
        } => {
            connect::run(connect::ConnectArgs {
                link_id,
                institution,
                institution_name,
                country,
                user_id,
                provider,
                json,
            })
            .await
        }
        Commands::List { user_id, json } => list::run(user_id, json).await,
        Commands::Status { json } => status::run(json).await,
        Commands::Sync {
            integration_id,
            incremental,
            data_types,
            json,
        } => sync::run(integration_id, incremental, data_types, json).await,
        Commands::Webhook { file, authorization } => {
            webhook::run(file.as_deref(), authorization.as_deref()).await
        }
        Commands::Disconnect {
            integration_id,
            force,
        } => disconnect::run(integration_id, force).await,
        Commands::Events {
            integration_id,
            limit,
            json,
        } => events::run(integration_id, limit, json).await,
        Commands::Rates { base, json } => rates::run(base, json).await,
        Commands::ExpireConsents { json } => expire::run(json).await,
    }
}
