use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tezos_delegation::config::{Config, ConfigOverrides};
use tezos_delegation::ingest::IngestionCycle;
use tezos_delegation::logging::init_logging;
use tezos_delegation::query::QueryService;
use tezos_delegation::server::run_server;
use tezos_delegation::store::SqliteStore;
use tezos_delegation::upstream::TzktClient;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "tezos-delegation",
    about = "Tezos delegation ingester and read API"
)]
struct Cli {
    #[arg(short, long, env = "TEZOS_DELEGATION_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    db: Option<String>,
    #[arg(long = "upstream-url")]
    upstream_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch delegations newer than the latest stored one.
    Ingest {
        /// Keep running, one cycle every N seconds.
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },
    Config {
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        upstream_url: cli.upstream_url.clone(),
        addr: match &cli.command {
            Commands::Serve { addr } => addr.clone(),
            _ => None,
        },
    });

    if let Commands::Config { init } = &cli.command {
        return handle_config_command(*init, &config, &config_path);
    }

    init_logging(config.log_format, config.debug);
    config.validate()?;

    let db_path = config.resolved_db_path();
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("failed opening store: {}", db_path.display()))?,
    );

    match &cli.command {
        Commands::Ingest { interval_secs } => {
            let source = Arc::new(TzktClient::new(&config.upstream)?);
            let cycle = IngestionCycle::new(source, store);
            let limit = Duration::from_secs(config.ingest.run_timeout_secs);
            match interval_secs {
                Some(secs) => {
                    let every = Duration::from_secs((*secs).max(1));
                    cycle.run_every(limit, every, shutdown_signal()).await;
                }
                None => run_ingest_once(&cycle, limit).await?,
            }
        }
        Commands::Serve { .. } => {
            run_server(QueryService::new(store), config.server_addr()?).await?;
        }
        Commands::Config { .. } => unreachable!("config command handled before dispatch"),
    }

    Ok(())
}

fn handle_config_command(init: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

async fn run_ingest_once(cycle: &IngestionCycle, limit: Duration) -> Result<()> {
    match cycle.run_with_timeout(limit).await {
        Ok(report) => {
            info!(cursor = ?report.cursor, written = report.written, "ingestion finished");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "ingestion failed");
            Err(err.into())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed listening for shutdown signal");
        std::future::pending::<()>().await;
    }
}
