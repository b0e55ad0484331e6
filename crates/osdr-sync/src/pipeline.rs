//! One export cycle: fetch → transform → stage → load → sync.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use osdr_adapters::{transform_batch, CatalogSource};
use osdr_storage::StagingStore;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Stage,
    Connect,
    Load,
    Sync,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Stage => "stage",
            CycleStage::Connect => "connect",
            CycleStage::Load => "load",
            CycleStage::Sync => "sync",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("writing staging file: {0:#}")]
    Staging(anyhow::Error),
    #[error("opening database session: {source}")]
    Connect {
        staged_file: PathBuf,
        #[source]
        source: PersistenceError,
    },
    #[error("loading export log: {source}")]
    Load {
        staged_file: PathBuf,
        #[source]
        source: PersistenceError,
    },
    #[error("synchronizing current state: {source}")]
    Sync {
        staged_file: PathBuf,
        #[source]
        source: PersistenceError,
    },
}

impl CycleError {
    pub fn stage(&self) -> CycleStage {
        match self {
            CycleError::Staging(_) => CycleStage::Stage,
            CycleError::Connect { .. } => CycleStage::Connect,
            CycleError::Load { .. } => CycleStage::Load,
            CycleError::Sync { .. } => CycleStage::Sync,
        }
    }

    /// The staging file written before the failure, if any. It stays on disk.
    pub fn staged_file(&self) -> Option<&Path> {
        match self {
            CycleError::Staging(_) => None,
            CycleError::Connect { staged_file, .. }
            | CycleError::Load { staged_file, .. }
            | CycleError::Sync { staged_file, .. } => Some(staged_file),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub staged_file: PathBuf,
    pub staged_sha256: String,
    pub loaded_rows: u64,
    pub synced_rows: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Skipped,
    Completed(CycleSummary),
    Failed {
        stage: CycleStage,
        error: String,
        staged_file: Option<PathBuf>,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped => "skipped",
            CycleOutcome::Completed(_) => "completed",
            CycleOutcome::Failed { .. } => "failed",
        }
    }
}

/// Anything the scheduler can run on each tick.
#[async_trait]
pub trait Cycle: Send + Sync {
    async fn run_cycle(&self) -> CycleOutcome;
}

pub struct ExportCycle {
    source: Box<dyn CatalogSource>,
    staging: StagingStore,
    warehouse: Box<dyn Warehouse>,
}

impl ExportCycle {
    pub fn new(
        source: Box<dyn CatalogSource>,
        staging: StagingStore,
        warehouse: Box<dyn Warehouse>,
    ) -> Self {
        Self {
            source,
            staging,
            warehouse,
        }
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Run one pass. Nothing is retried; a staged file is left on disk whatever
    /// happens after it was written.
    pub async fn run_once(&self) -> Result<CycleOutcome, CycleError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("export_cycle", %run_id);
        self.run_in_span(run_id).instrument(span).await
    }

    async fn run_in_span(&self, run_id: Uuid) -> Result<CycleOutcome, CycleError> {
        let started_at = Utc::now();
        let raw = self.source.fetch_records().await;
        if raw.is_empty() {
            warn!(source = self.source.source_id(), "no catalog records; skipping cycle");
            return Ok(CycleOutcome::Skipped);
        }

        let batch = transform_batch(&raw, started_at);
        let staged = self
            .staging
            .write_batch(&batch, started_at.with_timezone(&Local))
            .await
            .map_err(CycleError::Staging)?;

        let mut session = self
            .warehouse
            .connect()
            .await
            .map_err(|source| CycleError::Connect {
                staged_file: staged.path.clone(),
                source,
            })?;
        let loaded_rows = session
            .load_export_log(&staged, self.staging.locale())
            .await
            .map_err(|source| CycleError::Load {
                staged_file: staged.path.clone(),
                source,
            })?;
        let synced_rows = session
            .sync_current_state(&batch)
            .await
            .map_err(|source| CycleError::Sync {
                staged_file: staged.path.clone(),
                source,
            })?;
        if let Err(err) = session.close().await {
            warn!(error = %err, "closing database session failed");
        }

        let summary = CycleSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            fetched: raw.len(),
            staged_file: staged.path,
            staged_sha256: staged.content_hash,
            loaded_rows,
            synced_rows,
        };
        info!(
            fetched = summary.fetched,
            loaded = summary.loaded_rows,
            synced = summary.synced_rows,
            staged_file = %summary.staged_file.display(),
            "export cycle completed"
        );
        Ok(CycleOutcome::Completed(summary))
    }
}

#[async_trait]
impl Cycle for ExportCycle {
    async fn run_cycle(&self) -> CycleOutcome {
        match self.run_once().await {
            Ok(outcome) => outcome,
            Err(err) => {
                let stage = err.stage();
                error!(%stage, error = %err, "export cycle failed");
                CycleOutcome::Failed {
                    stage,
                    error: err.to_string(),
                    staged_file: err.staged_file().map(Path::to_path_buf),
                }
            }
        }
    }
}
