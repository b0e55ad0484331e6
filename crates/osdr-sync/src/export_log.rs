//! Bulk loader for the append-only export log (`osdr_exports`).

use std::path::Path;

use osdr_core::{non_empty, resolve_instant, BoolLocale, ExportLogRow};
use osdr_storage::{read_staged_rows, StagedRow};
use sqlx::{Connection, Executor, PgConnection};
use tracing::{info, warn};

use crate::error::PersistenceError;

pub const EXPORT_LOG_TABLE: &str = "osdr_exports";

pub const EXPORT_LOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS osdr_exports (
    id BIGSERIAL PRIMARY KEY,
    export_timestamp TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ,
    is_public BOOLEAN NOT NULL DEFAULT TRUE,
    has_samples BOOLEAN NOT NULL DEFAULT FALSE,
    has_assays BOOLEAN NOT NULL DEFAULT FALSE,
    row_number INTEGER NOT NULL,
    sample_count INTEGER DEFAULT 0,
    assay_count INTEGER DEFAULT 0,
    dataset_id TEXT,
    title TEXT,
    organism TEXT,
    study_type TEXT,
    status TEXT,
    raw_json JSONB,
    source_file TEXT NOT NULL,
    imported_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_osdr_exports_timestamp ON osdr_exports(export_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_osdr_exports_dataset ON osdr_exports(dataset_id);
CREATE INDEX IF NOT EXISTS idx_osdr_exports_organism ON osdr_exports(organism);
"#;

pub async fn ensure_export_log(conn: &mut PgConnection) -> Result<(), PersistenceError> {
    conn.execute(sqlx::raw_sql(EXPORT_LOG_SCHEMA))
        .await
        .map_err(|source| PersistenceError::Schema {
            table: EXPORT_LOG_TABLE,
            source,
        })?;
    Ok(())
}

/// Empty means 0; fractional values are truncated. Values outside the INTEGER
/// column range are row errors.
fn parse_staged_count(text: &str, column: &str, row_number: usize) -> Result<i32, PersistenceError> {
    if text.is_empty() {
        return Ok(0);
    }
    let value: f64 = text
        .parse()
        .map_err(|_| PersistenceError::row(row_number, format!("{column} is not numeric: {text:?}")))?;
    let truncated = value.trunc();
    if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&truncated) {
        return Err(PersistenceError::row(
            row_number,
            format!("{column} out of INTEGER range: {text:?}"),
        ));
    }
    Ok(truncated as i32)
}

/// Reverse the staging encoding of one row. `row_number` is the 1-based data row
/// in the file, used only for error reporting.
pub fn export_row_from_staged(
    row: &StagedRow,
    locale: BoolLocale,
    source_file: &str,
    row_number: usize,
) -> Result<ExportLogRow, PersistenceError> {
    let export_timestamp = resolve_instant(&row.export_timestamp).ok_or_else(|| {
        PersistenceError::row(
            row_number,
            format!("export_timestamp is not a timestamp: {:?}", row.export_timestamp),
        )
    })?;

    // Unresolvable text becomes NULL rather than failing the file, matching the
    // current-state sink. Otherwise one bad upstream value would fail every cycle.
    let updated_at = if row.updated_at.is_empty() {
        None
    } else {
        let parsed = resolve_instant(&row.updated_at);
        if parsed.is_none() {
            warn!(row_number, value = %row.updated_at, "unparseable updated_at stored as NULL");
        }
        parsed
    };

    let staged_row_number: i32 = row.row_number.parse().map_err(|_| {
        PersistenceError::row(row_number, format!("row_number is not an integer: {:?}", row.row_number))
    })?;

    let raw_json = if row.raw_json.is_empty() {
        None
    } else {
        Some(
            serde_json::from_str(&row.raw_json)
                .map_err(|err| PersistenceError::row(row_number, format!("raw_json: {err}")))?,
        )
    };

    Ok(ExportLogRow {
        export_timestamp,
        updated_at,
        is_public: locale.parse(&row.is_public),
        has_samples: locale.parse(&row.has_samples),
        has_assays: locale.parse(&row.has_assays),
        row_number: staged_row_number,
        sample_count: parse_staged_count(&row.sample_count, "sample_count", row_number)?,
        assay_count: parse_staged_count(&row.assay_count, "assay_count", row_number)?,
        dataset_id: non_empty(&row.dataset_id),
        title: non_empty(&row.title),
        organism: non_empty(&row.organism),
        study_type: non_empty(&row.study_type),
        status: non_empty(&row.status),
        raw_json,
        source_file: source_file.to_string(),
    })
}

/// Read a whole staging file into export-log rows, tagged with the file's name.
pub fn read_export_rows(path: &Path, locale: BoolLocale) -> Result<Vec<ExportLogRow>, PersistenceError> {
    let staged = read_staged_rows(path).map_err(|err| PersistenceError::StagedFile {
        path: path.to_path_buf(),
        reason: format!("{err:#}"),
    })?;
    let source_file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    staged
        .iter()
        .enumerate()
        .map(|(index, row)| export_row_from_staged(row, locale, &source_file, index + 1))
        .collect()
}

async fn insert_row(conn: &mut PgConnection, row: &ExportLogRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO osdr_exports (
            export_timestamp, updated_at, is_public, has_samples, has_assays,
            row_number, sample_count, assay_count,
            dataset_id, title, organism, study_type, status,
            raw_json, source_file
        ) VALUES (
            $1, $2, $3, $4, $5,
            $6, $7, $8,
            $9, $10, $11, $12, $13,
            $14, $15
        )
        "#,
    )
    .bind(row.export_timestamp)
    .bind(row.updated_at)
    .bind(row.is_public)
    .bind(row.has_samples)
    .bind(row.has_assays)
    .bind(row.row_number)
    .bind(row.sample_count)
    .bind(row.assay_count)
    .bind(&row.dataset_id)
    .bind(&row.title)
    .bind(&row.organism)
    .bind(&row.study_type)
    .bind(&row.status)
    .bind(&row.raw_json)
    .bind(&row.source_file)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Load every row of a staging file in one transaction. Returns the number of
/// rows inserted; any failure rolls the whole file back.
pub async fn load_staged_file(
    conn: &mut PgConnection,
    path: &Path,
    locale: BoolLocale,
) -> Result<u64, PersistenceError> {
    ensure_export_log(conn).await?;
    let owned_path = path.to_path_buf();
    let rows = tokio::task::spawn_blocking(move || read_export_rows(&owned_path, locale))
        .await
        .map_err(|err| PersistenceError::StagedFile {
            path: path.to_path_buf(),
            reason: format!("reader task failed: {err}"),
        })??;

    let query_err = |source: sqlx::Error| PersistenceError::Query {
        table: EXPORT_LOG_TABLE,
        source,
    };
    let mut tx = conn.begin().await.map_err(query_err)?;
    for row in &rows {
        insert_row(&mut *tx, row).await.map_err(query_err)?;
    }
    tx.commit().await.map_err(query_err)?;

    let inserted = rows.len() as u64;
    info!(inserted, source_file = %path.display(), "export log loaded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn staged(overrides: impl FnOnce(&mut StagedRow)) -> StagedRow {
        let mut row = StagedRow {
            export_timestamp: "2026-02-24T12:00:00.000000+00:00".into(),
            updated_at: "2025-07-01T00:00:00.000000+00:00".into(),
            is_public: "ИСТИНА".into(),
            has_samples: "ИСТИНА".into(),
            has_assays: "ЛОЖЬ".into(),
            row_number: "1".into(),
            sample_count: "3".into(),
            assay_count: "0".into(),
            dataset_id: "A1".into(),
            title: "Foo Bar".into(),
            organism: String::new(),
            study_type: String::new(),
            status: String::new(),
            raw_json: r#"{"id":"A1"}"#.into(),
        };
        overrides(&mut row);
        row
    }

    #[test]
    fn reverses_staging_encoding() {
        let row = export_row_from_staged(&staged(|_| {}), BoolLocale::RUSSIAN, "f.csv", 1)
            .expect("row");
        assert_eq!(row.export_timestamp, Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).unwrap());
        assert_eq!(row.updated_at, Some(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()));
        assert!(row.is_public && row.has_samples && !row.has_assays);
        assert_eq!(row.row_number, 1);
        assert_eq!(row.sample_count, 3);
        assert_eq!(row.dataset_id.as_deref(), Some("A1"));
        assert_eq!(row.organism, None);
        assert_eq!(row.raw_json, Some(serde_json::json!({"id": "A1"})));
        assert_eq!(row.source_file, "f.csv");
    }

    #[test]
    fn empty_fields_become_null_or_zero() {
        let row = export_row_from_staged(
            &staged(|r| {
                r.updated_at.clear();
                r.sample_count.clear();
                r.raw_json.clear();
                r.title.clear();
            }),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        )
        .expect("row");
        assert_eq!(row.updated_at, None);
        assert_eq!(row.sample_count, 0);
        assert_eq!(row.raw_json, None);
        assert_eq!(row.title, None);
    }

    #[test]
    fn fractional_counts_truncate() {
        let row = export_row_from_staged(
            &staged(|r| r.assay_count = "2.9".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        )
        .expect("row");
        assert_eq!(row.assay_count, 2);
    }

    #[test]
    fn counts_beyond_integer_range_are_row_errors() {
        let too_big = export_row_from_staged(
            &staged(|r| r.sample_count = "1000000000000".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            3,
        );
        assert!(matches!(too_big, Err(PersistenceError::Row { row_number: 3, .. })));

        let scientific = export_row_from_staged(
            &staged(|r| r.assay_count = "1e12".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        );
        assert!(scientific.is_err());

        let edge = export_row_from_staged(
            &staged(|r| r.sample_count = "2147483647.9".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        )
        .expect("row");
        assert_eq!(edge.sample_count, i32::MAX);
    }

    #[test]
    fn offset_updated_at_is_resolved() {
        let row = export_row_from_staged(
            &staged(|r| r.updated_at = "2024-05-06T07:08:09+02:00".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        )
        .expect("row");
        assert_eq!(row.updated_at, Some(Utc.with_ymd_and_hms(2024, 5, 6, 5, 8, 9).unwrap()));
    }

    #[test]
    fn unknown_boolean_token_reads_false() {
        let row = export_row_from_staged(
            &staged(|r| r.is_public = "TRUE".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        )
        .expect("row");
        assert!(!row.is_public);
    }

    #[test]
    fn unparseable_updated_at_is_null_not_an_error() {
        let row = export_row_from_staged(
            &staged(|r| r.updated_at = "sometime in May".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        )
        .expect("row");
        assert_eq!(row.updated_at, None);
    }

    #[test]
    fn broken_rows_are_errors() {
        let bad_count = export_row_from_staged(
            &staged(|r| r.sample_count = "many".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            4,
        );
        assert!(matches!(bad_count, Err(PersistenceError::Row { row_number: 4, .. })));

        let bad_json = export_row_from_staged(
            &staged(|r| r.raw_json = "{oops".into()),
            BoolLocale::RUSSIAN,
            "f.csv",
            2,
        );
        assert!(matches!(bad_json, Err(PersistenceError::Row { row_number: 2, .. })));

        let bad_stamp = export_row_from_staged(
            &staged(|r| r.export_timestamp.clear()),
            BoolLocale::RUSSIAN,
            "f.csv",
            1,
        );
        assert!(bad_stamp.is_err());
    }
}
