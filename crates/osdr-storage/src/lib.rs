//! Staging-file storage + HTTP fetch utilities for the OSDR exporter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Local};
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use osdr_core::{format_instant, BoolLocale, ExportBatch, NormalizedRecord, STAGING_COLUMNS};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "osdr-storage";

pub const DEFAULT_USER_AGENT: &str = concat!("osdr-exporter/", env!("CARGO_PKG_VERSION"));

const STAGING_PREFIX: &str = "osdr_export_";
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// One staging-file row. Field order is the column order of [`STAGING_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRow {
    pub export_timestamp: String,
    pub updated_at: String,
    pub is_public: String,
    pub has_samples: String,
    pub has_assays: String,
    pub row_number: String,
    pub sample_count: String,
    pub assay_count: String,
    pub dataset_id: String,
    pub title: String,
    pub organism: String,
    pub study_type: String,
    pub status: String,
    pub raw_json: String,
}

impl StagedRow {
    pub fn from_record(record: &NormalizedRecord, locale: BoolLocale) -> Self {
        Self {
            export_timestamp: format_instant(record.export_timestamp),
            updated_at: record
                .updated_at
                .as_ref()
                .map(|ts| ts.to_staged_string())
                .unwrap_or_default(),
            is_public: locale.render(record.is_public).to_string(),
            has_samples: locale.render(record.has_samples).to_string(),
            has_assays: locale.render(record.has_assays).to_string(),
            row_number: record.row_number.to_string(),
            sample_count: record.sample_count.to_string(),
            assay_count: record.assay_count.to_string(),
            dataset_id: record.dataset_id.clone(),
            title: record.title.clone(),
            organism: record.organism.clone(),
            study_type: record.study_type.clone(),
            status: record.status.clone(),
            raw_json: record.raw_json.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub rows: usize,
    pub byte_size: usize,
    pub content_hash: String,
}

/// Writes export batches as fully quoted CSV files under one directory.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
    locale: BoolLocale,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>, locale: BoolLocale) -> Self {
        Self {
            root: root.into(),
            locale,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locale(&self) -> BoolLocale {
        self.locale
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// `osdr_export_YYYYmmdd_HHMMSS.csv`, with `_<n>` appended for later attempts
    /// within the same second.
    pub fn staging_file_name(stamp: DateTime<Local>, attempt: u32) -> String {
        let stamp = stamp.format("%Y%m%d_%H%M%S");
        if attempt == 0 {
            format!("{STAGING_PREFIX}{stamp}.csv")
        } else {
            format!("{STAGING_PREFIX}{stamp}_{attempt}.csv")
        }
    }

    pub fn encode_batch(&self, batch: &ExportBatch) -> anyhow::Result<Vec<u8>> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(STAGING_COLUMNS)
            .context("writing staging header")?;
        for record in batch.iter() {
            writer
                .serialize(StagedRow::from_record(record, self.locale))
                .with_context(|| format!("writing staging row {}", record.row_number))?;
        }
        writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("flushing staging buffer: {}", err.error()))
    }

    /// Write a batch to a new file. Existing files are never replaced: the bytes go
    /// to a temp file that is hard-linked under the first free name. Volumes
    /// without hard links get an exclusive create on the final name instead.
    pub async fn write_batch(
        &self,
        batch: &ExportBatch,
        stamp: DateTime<Local>,
    ) -> anyhow::Result<StagedFile> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating staging directory {}", self.root.display()))?;

        let bytes = self.encode_batch(batch)?;
        let content_hash = Self::sha256_hex(&bytes);

        let (path, file_name) = match self.link_into_place(&bytes, stamp).await {
            Ok(placed) => placed,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "hard-linking staging file failed; creating it in place");
                self.create_exclusive(&bytes, stamp).await?
            }
        };

        info!(
            path = %path.display(),
            rows = batch.len(),
            bytes = bytes.len(),
            sha256 = %content_hash,
            "staging file written"
        );
        Ok(StagedFile {
            path,
            file_name,
            rows: batch.len(),
            byte_size: bytes.len(),
            content_hash,
        })
    }

    async fn link_into_place(
        &self,
        bytes: &[u8],
        stamp: DateTime<Local>,
    ) -> anyhow::Result<(PathBuf, String)> {
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let linked = self.link_temp_file(&temp_path, bytes, stamp).await;
        let _ = fs::remove_file(&temp_path).await;
        linked
    }

    async fn link_temp_file(
        &self,
        temp_path: &Path,
        bytes: &[u8],
        stamp: DateTime<Local>,
    ) -> anyhow::Result<(PathBuf, String)> {
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(temp_path)
            .await
            .with_context(|| format!("opening temp staging file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp staging file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp staging file {}", temp_path.display()))?;
        drop(file);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = Self::staging_file_name(stamp, attempt);
            let path = self.root.join(&file_name);
            match fs::hard_link(temp_path, &path).await {
                Ok(()) => return Ok((path, file_name)),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!(
                            "linking staging file {} -> {}",
                            temp_path.display(),
                            path.display()
                        )
                    });
                }
            }
        }
        bail!(
            "no free staging file name for {} after {MAX_NAME_ATTEMPTS} attempts",
            Self::staging_file_name(stamp, 0)
        )
    }

    /// `create_new` on each candidate name. A partially written file is removed.
    async fn create_exclusive(
        &self,
        bytes: &[u8],
        stamp: DateTime<Local>,
    ) -> anyhow::Result<(PathBuf, String)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = Self::staging_file_name(stamp, attempt);
            let path = self.root.join(&file_name);
            let mut file = match fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("creating staging file {}", path.display()))
                }
            };
            let written = match file.write_all(bytes).await {
                Ok(()) => file.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(err).with_context(|| format!("writing staging file {}", path.display()));
            }
            return Ok((path, file_name));
        }
        bail!(
            "no free staging file name for {} after {MAX_NAME_ATTEMPTS} attempts",
            Self::staging_file_name(stamp, 0)
        )
    }
}

/// Read a staging file back. The header must match [`STAGING_COLUMNS`] exactly.
pub fn read_staged_rows(path: impl AsRef<Path>) -> anyhow::Result<Vec<StagedRow>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening staging file {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?;
    if !headers.iter().eq(STAGING_COLUMNS.iter().copied()) {
        bail!(
            "unexpected staging header in {}: {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>()
        );
    }

    let mut rows = Vec::new();
    for (index, row) in reader.deserialize::<StagedRow>().enumerate() {
        let row = row.with_context(|| format!("parsing {} data row {}", path.display(), index + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub bearer_token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            bearer_token: None,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    bearer_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let bearer_token = config.bearer_token.filter(|token| !token.is_empty());

        Ok(Self {
            client,
            bearer_token,
        })
    }

    /// Single GET with no retries; retrying is left to the next scheduled cycle.
    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let mut request = self.client.get(url);
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }

            let resp = request.send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}
