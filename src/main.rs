use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use ulid::Ulid;

use banya::catalog::{CatalogSeed, InMemoryCatalog};
use banya::config::Config;
use banya::engine::Engine;
use banya::service::ReservationService;

#[derive(Parser)]
#[command(name = "banya", version, about = "Bathhouse reservation store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay the WAL and verify the cleaning buffer on every facility.
    Check,
    /// Print the reservations starting on one day as JSON.
    List {
        /// `YYYY-MM-DD`, or a timestamp whose date is used.
        #[arg(long)]
        date: String,
        #[arg(long)]
        facility: Option<Ulid>,
    },
    /// Rewrite the WAL with one record per live reservation.
    Compact,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    if let Err(e) = banya::observability::init(config.metrics_port) {
        warn!("metrics exporter not started: {e}");
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let seed = match &config.catalog_path {
        Some(path) => CatalogSeed::from_path(path)?,
        None => CatalogSeed::default(),
    };
    info!("  data_dir: {}", config.data_dir.display());
    info!("  buffer policy: {:?}", config.buffer_policy);

    let engine = Arc::new(Engine::open(config.wal_path(), config.engine_config())?);

    match cli.command {
        Command::Check => {
            let violations = engine.audit().await;
            println!(
                "{} reservations on {} facilities, {} bytes discarded from the WAL tail",
                engine.reservation_count(),
                engine.facility_count(),
                engine.replay_discarded_bytes()
            );
            for v in &violations {
                println!(
                    "facility {}: {} and {} are closer than the cleaning buffer",
                    v.facility_id, v.first, v.second
                );
            }
            if !violations.is_empty() {
                return Err(format!("{} buffer violations", violations.len()).into());
            }
        }
        Command::List { date, facility } => {
            let service = ReservationService::new(
                engine.clone(),
                Arc::new(InMemoryCatalog::from_seed(&seed)),
                Arc::new(seed.status_table()),
            );
            let views = service.list(&date, facility).await?;
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        Command::Compact => {
            engine.compact_wal().await?;
            println!("compacted {} reservations", engine.reservation_count());
        }
    }
    Ok(())
}
