//! Current-state synchronizer: one row per dataset in `osdr_items`, last write wins.

use chrono::{DateTime, Utc};
use osdr_core::{CurrentStateRow, ExportBatch};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{Connection, Executor, PgConnection, Row};
use tracing::info;

use crate::error::PersistenceError;

pub const CURRENT_STATE_TABLE: &str = "osdr_items";

pub const CURRENT_STATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS osdr_items (
    id BIGSERIAL PRIMARY KEY,
    dataset_id TEXT NOT NULL UNIQUE,
    title TEXT,
    organism TEXT,
    study_type TEXT,
    status TEXT,
    updated_at TIMESTAMPTZ,
    inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    raw JSONB
);
"#;

/// `updated_at` is only replaced by a non-null incoming value.
const UPSERT_SQL: &str = r#"
INSERT INTO osdr_items (dataset_id, title, organism, study_type, status, updated_at, raw)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (dataset_id) DO UPDATE SET
    title = EXCLUDED.title,
    organism = EXCLUDED.organism,
    study_type = EXCLUDED.study_type,
    status = EXCLUDED.status,
    updated_at = COALESCE(EXCLUDED.updated_at, osdr_items.updated_at),
    raw = EXCLUDED.raw,
    inserted_at = NOW()
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentStateView {
    pub dataset_id: String,
    pub title: Option<String>,
    pub organism: Option<String>,
    pub study_type: Option<String>,
    pub status: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub inserted_at: DateTime<Utc>,
    pub raw: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentStateSummary {
    pub datasets: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

pub async fn ensure_current_state(conn: &mut PgConnection) -> Result<(), PersistenceError> {
    conn.execute(sqlx::raw_sql(CURRENT_STATE_SCHEMA))
        .await
        .map_err(|source| PersistenceError::Schema {
            table: CURRENT_STATE_TABLE,
            source,
        })?;
    Ok(())
}

pub fn current_state_rows(batch: &ExportBatch) -> Result<Vec<CurrentStateRow>, PersistenceError> {
    batch
        .iter()
        .map(|record| {
            CurrentStateRow::from_record(record).map_err(|err| {
                PersistenceError::row(record.row_number as usize, format!("raw_json: {err}"))
            })
        })
        .collect()
}

async fn upsert_row(conn: &mut PgConnection, row: &CurrentStateRow) -> Result<(), sqlx::Error> {
    sqlx::query(UPSERT_SQL)
        .bind(&row.dataset_id)
        .bind(&row.title)
        .bind(&row.organism)
        .bind(&row.study_type)
        .bind(&row.status)
        .bind(row.updated_at)
        .bind(&row.raw)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Upsert the live batch in one transaction. Returns the number of rows written.
pub async fn sync_batch(conn: &mut PgConnection, batch: &ExportBatch) -> Result<u64, PersistenceError> {
    ensure_current_state(conn).await?;
    let rows = current_state_rows(batch)?;

    let query_err = |source: sqlx::Error| PersistenceError::Query {
        table: CURRENT_STATE_TABLE,
        source,
    };
    let mut tx = conn.begin().await.map_err(query_err)?;
    for row in &rows {
        upsert_row(&mut *tx, row).await.map_err(query_err)?;
    }
    tx.commit().await.map_err(query_err)?;

    let upserted = rows.len() as u64;
    info!(upserted, "current state synchronized");
    Ok(upserted)
}

pub async fn current_state_summary(
    conn: &mut PgConnection,
) -> Result<CurrentStateSummary, PersistenceError> {
    let row = sqlx::query("SELECT COUNT(*) AS datasets, MAX(inserted_at) AS last_synced_at FROM osdr_items")
        .fetch_one(&mut *conn)
        .await
        .map_err(|source| PersistenceError::Query {
            table: CURRENT_STATE_TABLE,
            source,
        })?;
    let decode_err = |source: sqlx::Error| PersistenceError::Query {
        table: CURRENT_STATE_TABLE,
        source,
    };
    Ok(CurrentStateSummary {
        datasets: row.try_get("datasets").map_err(decode_err)?,
        last_synced_at: row.try_get("last_synced_at").map_err(decode_err)?,
    })
}

/// Most recently updated datasets first; rows without a timestamp last.
pub async fn latest_current_state(
    conn: &mut PgConnection,
    limit: i64,
) -> Result<Vec<CurrentStateView>, PersistenceError> {
    let query_err = |source: sqlx::Error| PersistenceError::Query {
        table: CURRENT_STATE_TABLE,
        source,
    };
    let rows = sqlx::query(
        r#"
        SELECT dataset_id, title, organism, study_type, status, updated_at, inserted_at, raw
          FROM osdr_items
         ORDER BY updated_at DESC NULLS LAST, dataset_id
         LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(query_err)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(CurrentStateView {
            dataset_id: row.try_get("dataset_id").map_err(query_err)?,
            title: row.try_get("title").map_err(query_err)?,
            organism: row.try_get("organism").map_err(query_err)?,
            study_type: row.try_get("study_type").map_err(query_err)?,
            status: row.try_get("status").map_err(query_err)?,
            updated_at: row.try_get("updated_at").map_err(query_err)?,
            inserted_at: row.try_get("inserted_at").map_err(query_err)?,
            raw: row.try_get("raw").map_err(query_err)?,
        });
    }
    Ok(out)
}
