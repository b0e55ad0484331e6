//! Catalog source contracts: fetching the dataset listing and unwrapping its
//! response envelope into raw records, plus the record transformer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use osdr_core::RawRecord;
use osdr_storage::{FetchError, HttpFetcher};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, warn};

pub mod transform;

pub use transform::{transform_batch, transform_record, LogicalField};

pub const CRATE_NAME: &str = "osdr-adapters";

/// Envelope keys that may hold the record array, checked in order.
const ENVELOPE_KEYS: [&str; 3] = ["items", "results", "data"];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed catalog payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("reading fixture {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_raw(&self) -> Result<Vec<RawRecord>, AdapterError>;

    /// Upstream failures are logged and reported as an empty listing.
    async fn fetch_records(&self) -> Vec<RawRecord> {
        match self.fetch_raw().await {
            Ok(records) => {
                info!(source = self.source_id(), records = records.len(), "catalog fetched");
                records
            }
            Err(err) => {
                error!(source = self.source_id(), error = %err, "catalog fetch failed");
                Vec::new()
            }
        }
    }
}

/// Accepts a top-level array, or an object whose `items`/`results`/`data` holds
/// an array; any other object is a single record. Non-object elements are dropped.
pub fn unwrap_envelope(payload: JsonValue) -> Vec<RawRecord> {
    let items = match payload {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut envelope) => {
            let key = ENVELOPE_KEYS
                .iter()
                .find(|key| matches!(envelope.get(**key), Some(JsonValue::Array(_))));
            match key.and_then(|key| envelope.remove(*key)) {
                Some(JsonValue::Array(items)) => items,
                _ => return vec![envelope],
            }
        }
        other => {
            warn!(kind = json_kind(&other), "catalog payload is neither array nor object");
            return Vec::new();
        }
    };

    let total = items.len();
    let records: Vec<RawRecord> = items
        .into_iter()
        .filter_map(|item| match item {
            JsonValue::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    if records.len() < total {
        warn!(
            dropped = total - records.len(),
            "catalog items that are not objects were skipped"
        );
    }
    records
}

pub fn parse_payload(bytes: &[u8]) -> Result<Vec<RawRecord>, AdapterError> {
    let payload: JsonValue = serde_json::from_slice(bytes)?;
    Ok(unwrap_envelope(payload))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// The OSDR dataset listing served over HTTP.
#[derive(Debug)]
pub struct OsdrCatalog {
    http: HttpFetcher,
    url: String,
}

impl OsdrCatalog {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CatalogSource for OsdrCatalog {
    fn source_id(&self) -> &str {
        "osdr-api"
    }

    async fn fetch_raw(&self) -> Result<Vec<RawRecord>, AdapterError> {
        info!(url = %self.url, "requesting catalog");
        let resp = self.http.fetch_bytes(&self.url).await?;
        parse_payload(&resp.body)
    }
}

/// A captured catalog response on disk, read with the same envelope rules.
#[derive(Debug, Clone)]
pub struct FixtureCatalog {
    path: PathBuf,
}

impl FixtureCatalog {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CatalogSource for FixtureCatalog {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_raw(&self) -> Result<Vec<RawRecord>, AdapterError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| AdapterError::Fixture {
                path: self.path.clone(),
                source,
            })?;
        parse_payload(&bytes)
    }
}
