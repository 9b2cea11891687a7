//! hrledger - HandReceipt ledger operator CLI
//!
//! Opens the configured ledger backend and runs one maintenance or audit
//! command against it. Results are printed to stdout as JSON; logs go to
//! stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use handreceipt_ledger::{open_ledger, LedgerConfig, LedgerResult, LedgerService};
use serde_json::{json, Value};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// HandReceipt ledger CLI
#[derive(Parser, Debug)]
#[command(name = "hrledger")]
#[command(about = "Inspect and verify the HandReceipt hash-chained ledger", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HANDRECEIPT_LEDGER_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "HANDRECEIPT_LEDGER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Commands {
    /// Create the ledger table, indexes and immutability triggers
    Init,

    /// Walk the whole chain and report every broken link
    Verify,

    /// Check a single entry's hash against its predecessor
    VerifyDocument {
        /// Event id of the entry
        event_id: String,

        /// Table hint kept for compatibility with older callers
        #[arg(long, default_value = "ledger_entries")]
        table: String,
    },

    /// Show the history of one item, or the general ledger history
    History {
        /// Item (property) id
        #[arg(long)]
        item: Option<u64>,

        /// Maximum number of records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List correction events
    Corrections {
        /// Only corrections of this original event id
        #[arg(long)]
        original: Option<String>,
    },

    /// Show one correction event
    Correction {
        /// Event id of the correction
        event_id: String,
    },
}

/// JSON result of a command and whether it succeeded.
struct Outcome {
    body: Value,
    success: bool,
}

impl Outcome {
    fn ok(body: Value) -> Self {
        Self {
            body,
            success: true,
        }
    }
}

async fn execute(ledger: &dyn LedgerService, command: &Commands) -> anyhow::Result<Outcome> {
    let outcome = match command {
        Commands::Init => Outcome::ok(json!({
            "backend": ledger.backend_name(),
            "initialized": true,
        })),
        Commands::Verify => {
            let report = ledger
                .verify_chain_integrity()
                .await
                .context("chain verification failed to run")?;
            Outcome {
                success: report.is_valid(),
                body: json!({
                    "valid": report.is_valid(),
                    "entries_checked": report.entries_checked,
                    "errors": report.errors,
                }),
            }
        }
        Commands::VerifyDocument { event_id, table } => {
            let verified = ledger.verify_document(event_id, table).await?;
            Outcome::ok(json!({ "event_id": event_id, "verified": verified }))
        }
        Commands::History {
            item: Some(item),
            limit,
        } => {
            let mut history = ledger.get_property_history(*item).await?;
            if let Some(limit) = limit {
                history.truncate(*limit);
            }
            Outcome::ok(serde_json::to_value(history)?)
        }
        Commands::History { item: None, limit } => {
            let mut history = ledger.get_general_history().await?;
            if let Some(limit) = limit {
                history.truncate(*limit);
            }
            Outcome::ok(serde_json::to_value(history)?)
        }
        Commands::Corrections { original: None } => {
            Outcome::ok(serde_json::to_value(ledger.get_all_correction_events().await?)?)
        }
        Commands::Corrections {
            original: Some(original),
        } => Outcome::ok(serde_json::to_value(
            ledger.get_correction_events_by_original_id(original).await?,
        )?),
        Commands::Correction { event_id } => Outcome::ok(serde_json::to_value(
            ledger.get_correction_event_by_id(event_id).await?,
        )?),
    };
    Ok(outcome)
}

/// Combine the command result with the close result. A command error wins;
/// a close failure after a failed command is only logged.
fn settle(result: anyhow::Result<Outcome>, closed: LedgerResult<()>) -> anyhow::Result<Outcome> {
    match (result, closed) {
        (result, Ok(())) => result,
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "failed to close ledger");
            Err(err)
        }
        (Ok(_), Err(close_err)) => Err(close_err).context("failed to close ledger"),
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        LedgerConfig::load(cli.config.as_deref()).context("failed to load ledger configuration")?;
    if let Commands::History {
        item: None,
        limit: Some(limit),
    } = &cli.command
    {
        config.history_limit = (*limit).max(1);
    }

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, cli.json_logs || config.logging.json);

    tracing::debug!(backend = config.backend.label(), "opening ledger");
    let ledger = open_ledger(&config).await?;
    ledger
        .initialize()
        .await
        .with_context(|| format!("failed to initialize {} ledger", config.backend.label()))?;

    let result = execute(ledger.as_ref(), &cli.command).await;
    let outcome = settle(result, ledger.close().await)?;

    println!("{}", serde_json::to_string_pretty(&outcome.body)?);
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
