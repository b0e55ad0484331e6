use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use osdr_adapters::FixtureCatalog;
use osdr_storage::StagingStore;
use osdr_sync::{
    build_cycle, run_periodic, Cycle, CycleOutcome, ExportCycle, ExporterConfig, PgWarehouse,
    TokioTrigger,
};
use tracing::info;

mod logging;

#[derive(Debug, Parser)]
#[command(name = "osdr-cli")]
#[command(about = "OSDR dataset exporter: catalog -> staging CSV -> Postgres")]
struct Cli {
    /// Overrides CSV_OUT_DIR.
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,
    /// Overrides GEN_PERIOD_SEC.
    #[arg(long, global = true)]
    period_secs: Option<u64>,
    /// Overrides INITIAL_DELAY_SEC.
    #[arg(long, global = true)]
    initial_delay_secs: Option<u64>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run cycles on the configured period until Ctrl-C.
    Run,
    /// Run a single cycle and exit.
    Once {
        /// Read the listing from a captured response instead of the API.
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Create both tables and their indexes if missing.
    Migrate,
    /// Show the current-state table.
    Status {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

impl Cli {
    fn config(&self) -> ExporterConfig {
        let mut config = ExporterConfig::from_env();
        if let Some(dir) = &self.staging_dir {
            config.staging_dir = dir.clone();
        }
        if let Some(secs) = self.period_secs {
            config.period = Duration::from_secs(secs);
        }
        if let Some(secs) = self.initial_delay_secs {
            config.initial_delay = Duration::from_secs(secs);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    logging::init_logging(logging::LogFormat::from_env())?;
    let cli = Cli::parse();
    let config = cli.config();
    info!(
        api_url = %config.api_url,
        staging_dir = %config.staging_dir.display(),
        database = ?config.database,
        period_secs = config.period.as_secs(),
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let cycle = Arc::new(build_cycle(&config)?);
            let mut trigger = TokioTrigger;
            let report = run_periodic(config.schedule(), &mut trigger, cycle).await;
            println!(
                "scheduler stopped: cycles={} completed={} skipped={} failed={}",
                report.cycles, report.completed, report.skipped, report.failed
            );
        }
        Commands::Once { fixture } => {
            let cycle = match fixture {
                Some(path) => ExportCycle::new(
                    Box::new(FixtureCatalog::from_path(path)),
                    StagingStore::new(config.staging_dir.clone(), config.bool_locale),
                    Box::new(PgWarehouse::new(config.database.connect_options())),
                ),
                None => build_cycle(&config)?,
            };
            let outcome = cycle.run_cycle().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("rendering cycle outcome")?
            );
            if let CycleOutcome::Failed { .. } = outcome {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Migrate => {
            PgWarehouse::new(config.database.connect_options())
                .ensure_schema()
                .await?;
            println!("schema ready: osdr_exports, osdr_items");
        }
        Commands::Status { limit } => {
            let (summary, latest) = PgWarehouse::new(config.database.connect_options())
                .status(limit)
                .await?;
            println!(
                "datasets={} last_synced_at={}",
                summary.datasets,
                summary
                    .last_synced_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            for item in latest {
                println!(
                    "{}\t{}\t{}",
                    item.dataset_id,
                    item.updated_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    item.title.unwrap_or_default()
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
