use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use insider_adapters::{CollectContext, Collector};
use insider_storage::SheetStore;
use insider_sync::JobConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "insider-cli")]
#[command(about = "Append new OpenInsider trades to a newest-first spreadsheet")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Collect, deduplicate and prepend new trades (default).
    Sync,
    /// Only make sure the header row exists.
    Headers,
    /// Print the collected trades as JSON without touching the store.
    Collect,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "insider_cli=info,insider_sync=info,insider_adapters=info,insider_storage=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = insider_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} scraped={} new={} inserted={} store={}",
                summary.run_id, summary.scraped, summary.new_trades, summary.inserted, summary.store
            );
        }
        Commands::Headers => {
            let config = JobConfig::from_env()?;
            let store = config.build_store().await?;
            store
                .ensure_headers()
                .await
                .with_context(|| format!("ensuring header row in {}", store.describe()))?;
            println!("headers present: {}", store.describe());
        }
        Commands::Collect => {
            let config = JobConfig::from_env()?;
            let collector = config.build_collector()?;
            let trades = collector
                .collect(&CollectContext::new(Uuid::new_v4()))
                .await
                .context("collecting trades")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&trades).context("serializing trades")?
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommand_defaults_to_sync() {
        let cli = Cli::try_parse_from(["insider-cli"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["insider-cli", "collect"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Collect)));
    }
}
