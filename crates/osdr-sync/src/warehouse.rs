use async_trait::async_trait;
use osdr_core::{BoolLocale, ExportBatch};
use osdr_storage::StagedFile;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use tracing::warn;

use crate::current_state::{
    current_state_summary, ensure_current_state, latest_current_state, sync_batch,
    CurrentStateSummary, CurrentStateView,
};
use crate::error::PersistenceError;
use crate::export_log::{ensure_export_log, load_staged_file};

/// Opens one session per cycle. Sessions are never shared between cycles.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WarehouseSession>, PersistenceError>;
}

/// Both sinks behind one database handle. Each call is its own transaction.
#[async_trait]
pub trait WarehouseSession: Send {
    async fn load_export_log(
        &mut self,
        staged: &StagedFile,
        locale: BoolLocale,
    ) -> Result<u64, PersistenceError>;

    async fn sync_current_state(&mut self, batch: &ExportBatch) -> Result<u64, PersistenceError>;

    async fn close(self: Box<Self>) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgWarehouse {
    options: PgConnectOptions,
}

impl PgWarehouse {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    async fn open(&self) -> Result<PgConnection, PersistenceError> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(PersistenceError::Connect)
    }

    /// Create both tables and their indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        let mut conn = self.open().await?;
        ensure_export_log(&mut conn).await?;
        ensure_current_state(&mut conn).await?;
        close_quietly(conn).await;
        Ok(())
    }

    pub async fn status(
        &self,
        limit: i64,
    ) -> Result<(CurrentStateSummary, Vec<CurrentStateView>), PersistenceError> {
        let mut conn = self.open().await?;
        ensure_current_state(&mut conn).await?;
        let summary = current_state_summary(&mut conn).await?;
        let latest = latest_current_state(&mut conn, limit).await?;
        close_quietly(conn).await;
        Ok((summary, latest))
    }
}

async fn close_quietly(conn: PgConnection) {
    if let Err(err) = conn.close().await {
        warn!(error = %err, "closing postgres connection failed");
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn connect(&self) -> Result<Box<dyn WarehouseSession>, PersistenceError> {
        let conn = self.open().await?;
        Ok(Box::new(PgSession { conn }))
    }
}

pub struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl WarehouseSession for PgSession {
    async fn load_export_log(
        &mut self,
        staged: &StagedFile,
        locale: BoolLocale,
    ) -> Result<u64, PersistenceError> {
        load_staged_file(&mut self.conn, &staged.path, locale).await
    }

    async fn sync_current_state(&mut self, batch: &ExportBatch) -> Result<u64, PersistenceError> {
        sync_batch(&mut self.conn, batch).await
    }

    async fn close(self: Box<Self>) -> Result<(), PersistenceError> {
        self.conn.close().await.map_err(PersistenceError::Connect)
    }
}
