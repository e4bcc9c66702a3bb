use std::error::Error as _;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use search_sync::commands::{self, CollectionOutcome, SetupOptions, SyncOptions};
use search_sync::{Dependencies, Settings, SyncError};
use search_sync_pipeline::TransformRegistry;

#[derive(Parser)]
#[command(name = "search-sync")]
#[command(about = "Synchronize PostgreSQL tables into Typesense collections", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Table configuration file
    #[arg(long, default_value = search_sync::config::DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Only these tables (comma separated)
    #[arg(long, value_delimiter = ',', global = true)]
    tables: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install change capture and create collections
    Setup {
        /// Drop and recreate existing collections
        #[arg(long)]
        recreate: bool,

        /// Enqueue every existing row
        #[arg(long)]
        backfill_queue: bool,
    },
    /// Apply queued changes until the queue is empty
    Sync {
        /// Queue entries per batch
        #[arg(long, default_value = "100")]
        batch_size: usize,

        /// Retries of a failed batch
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Delay before the first retry, in milliseconds
        #[arg(long, default_value = "1000")]
        retry_delay_ms: u64,
    },
    /// Report queue and collection state
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);

        let mut source = e.source();
        while let Some(err) = source {
            eprintln!("  Caused by: {}", err);
            source = err.source();
        }

        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), SyncError> {
    let registry = TransformRegistry::with_builtins();
    let settings = Settings::load(&cli.config, &registry)?;
    let tables = settings.select_tables(&cli.tables)?;

    let deps = Dependencies::new(&settings, registry).await?;

    let result = match cli.command {
        Commands::Setup {
            recreate,
            backfill_queue,
        } => {
            info!(tables = tables.len(), recreate, backfill_queue, "Starting setup");
            let options = SetupOptions {
                recreate,
                backfill_queue,
            };
            commands::run_setup(&deps, &tables, options).await.map(|report| {
                for (collection, outcome) in &report.collections {
                    match outcome {
                        CollectionOutcome::Existing(differences) if !differences.is_empty() => warn!(
                            collection = %collection,
                            differences = differences.len(),
                            "Collection kept, use --recreate to apply the configuration"
                        ),
                        outcome => info!(collection = %collection, ?outcome, "Collection ready"),
                    }
                }
                for (source_name, enqueued) in &report.backfilled {
                    info!(source_name = %source_name, enqueued, "Backfill queued");
                }
                info!(
                    triggers_created = report.triggers_created.len(),
                    triggers_existing = report.triggers_existing.len(),
                    backfill_failures = report.backfill_failures.len(),
                    "Setup finished"
                );
            })
        }
        Commands::Sync {
            batch_size,
            max_retries,
            retry_delay_ms,
        } => {
            info!(tables = tables.len(), batch_size, max_retries, "Starting sync");
            let options = SyncOptions {
                batch_size,
                max_retries,
                retry_delay: Duration::from_millis(retry_delay_ms),
            };
            match deps.verify_index().await {
                Ok(()) => commands::run_sync(&deps, &tables, options).await.map(|report| {
                    info!(
                        batches = report.batches,
                        upserted = report.upserted,
                        deleted = report.deleted,
                        skipped = report.skipped,
                        "Sync finished"
                    );
                }),
                Err(e) => Err(e),
            }
        }
        Commands::Status => commands::collect_status(&deps, &tables)
            .await
            .map(|report| print!("{}", commands::render(&report))),
    };

    deps.shutdown().await;
    result
}
