use std::path::PathBuf;

use thiserror::Error;

/// Failures while writing to either relational sink. Each one aborts the
/// transaction it happened in.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("connecting to postgres: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("ensuring schema for {table}: {source}")]
    Schema {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("reading staged file {path}: {reason}")]
    StagedFile { path: PathBuf, reason: String },
    #[error("staged row {row_number}: {reason}")]
    Row { row_number: usize, reason: String },
    #[error("{table} write failed: {source}")]
    Query {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl PersistenceError {
    pub(crate) fn row(row_number: usize, reason: impl Into<String>) -> Self {
        PersistenceError::Row {
            row_number,
            reason: reason.into(),
        }
    }
}
