use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod db;
mod error;
mod identities;
mod ingest;
mod models;
mod report;
mod scheduler;
mod snapshot;
mod store;

use crate::client::GatewayClient;
use crate::config::Settings;
use crate::db::PgStore;
use crate::ingest::IngestPipeline;
use crate::models::{EmployeeId, IngestConfig};
use crate::scheduler::{Scheduler, SyncCycle};
use crate::store::{MemoryStore, Store};

#[derive(Parser)]
#[command(name = "incident-sync")]
#[command(about = "Keeps a per-employee security incident report in sync with the incident API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override logging level (e.g., error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Run the sync loop until interrupted (default)
    Run,
    /// Run a single sync cycle and exit
    Sync,
    /// Reconcile employee identities from a CSV file
    ImportIdentities {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print the last published snapshot
    Show {
        #[arg(long)]
        employee: Option<EmployeeId>,
    },
}

fn init_tracing(cli_level: Option<&str>, configured_level: &str) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured_level)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn Store>> {
    let Some(url) = settings.database.url.as_deref() else {
        warn!("database.url is not set, using an in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let store = PgStore::connect(url, settings.database.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    store
        .migrate()
        .await
        .context("failed to apply database migrations")?;
    Ok(Arc::new(store))
}

async fn build_cycle(settings: &Settings) -> anyhow::Result<SyncCycle> {
    if settings.api.username.is_empty() {
        warn!("api.username is empty, requests will likely be rejected");
    }

    let store = open_store(settings).await?;
    let client = GatewayClient::new(&settings.api).context("failed to build HTTP client")?;

    Ok(SyncCycle::new(
        Arc::new(client),
        store,
        IngestPipeline::new(IngestConfig::default()),
        settings.snapshot.path.clone(),
    ))
}

async fn run_scheduler(settings: &Settings) -> anyhow::Result<()> {
    let (ready_tx, ready_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let cycle = build_cycle(settings).await?;
    let handle = Scheduler::new(cycle, settings.scheduler.interval()).spawn(ready_rx, shutdown_rx)?;

    // Store and client are up, so the first cycle may start.
    ready_tx.send_replace(true);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested, waiting for the current cycle to finish");
    shutdown_tx.send_replace(true);

    handle.await.context("scheduler task panicked")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(cli.log_level.as_deref(), &settings.logging.level);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::InitDb => {
            if settings.database.url.is_none() {
                anyhow::bail!("database.url must be set to initialize the schema");
            }
            open_store(&settings).await?;
            println!("Schema ready.");
        }
        Commands::Run => run_scheduler(&settings).await?,
        Commands::Sync => {
            let cycle = build_cycle(&settings).await?;
            let report = cycle.run_once().await?;

            match report.identities {
                Some(identities) => println!(
                    "Identities: {} created, {} updated, {} unchanged, {} failed.",
                    identities.created, identities.updated, identities.unchanged, identities.failed
                ),
                None => println!("Identities: fetch failed, stored employees kept."),
            }
            for kind in &report.ingest.types {
                match &kind.error {
                    Some(err) => println!("- {}: failed ({err})", kind.incident_type),
                    None => println!(
                        "- {}: {} fetched, {} stored, {} unowned, {} invalid",
                        kind.incident_type,
                        kind.fetched,
                        kind.stored,
                        kind.dropped_unowned,
                        kind.dropped_invalid
                    ),
                }
            }
            println!(
                "Snapshot with {} employees written to {}.",
                report.snapshot_employees,
                settings.snapshot.path.display()
            );
        }
        Commands::ImportIdentities { csv } => {
            let store = open_store(&settings).await?;
            let report = identities::import_csv(store.as_ref(), &csv).await?;
            println!(
                "Imported identities from {}: {} created, {} updated, {} unchanged, {} failed.",
                csv.display(),
                report.created,
                report.updated,
                report.unchanged,
                report.failed
            );
        }
        Commands::Show { employee } => {
            let path = &settings.snapshot.path;
            let Some(snapshot) = snapshot::load(path).await? else {
                println!("No snapshot published at {}.", path.display());
                return Ok(());
            };

            match employee {
                None => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                Some(id) => match snapshot.get(&id) {
                    Some(summary) => println!("{}", serde_json::to_string_pretty(summary)?),
                    None => println!("Employee {id} has no incidents in the current snapshot."),
                },
            }
        }
    }

    Ok(())
}
