//! Export cycle orchestration: configuration, the two relational sinks, the
//! cycle driver and its scheduler.

use anyhow::{Context, Result};
use osdr_adapters::OsdrCatalog;
use osdr_storage::{HttpFetcher, StagingStore};

pub mod config;
pub mod current_state;
pub mod error;
pub mod export_log;
pub mod pipeline;
pub mod schedule;
pub mod warehouse;

pub use config::{DatabaseConfig, ExporterConfig, DEFAULT_API_URL};
pub use current_state::{CurrentStateSummary, CurrentStateView, CURRENT_STATE_TABLE};
pub use error::PersistenceError;
pub use export_log::{load_staged_file, read_export_rows, EXPORT_LOG_TABLE};
pub use pipeline::{Cycle, CycleError, CycleOutcome, CycleStage, CycleSummary, ExportCycle};
pub use schedule::{run_periodic, Schedule, ScheduleReport, TokioTrigger, Trigger};
pub use warehouse::{PgWarehouse, Warehouse, WarehouseSession};

pub const CRATE_NAME: &str = "osdr-sync";

/// Wire the live catalog, the staging directory and Postgres into one cycle.
pub fn build_cycle(config: &ExporterConfig) -> Result<ExportCycle> {
    let http = HttpFetcher::new(config.http_config()).context("building http client")?;
    let source = OsdrCatalog::new(http, config.api_url.clone());
    let staging = StagingStore::new(config.staging_dir.clone(), config.bool_locale);
    let warehouse = PgWarehouse::new(config.database.connect_options());
    Ok(ExportCycle::new(
        Box::new(source),
        staging,
        Box::new(warehouse),
    ))
}
