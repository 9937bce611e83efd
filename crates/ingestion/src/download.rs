//! Document acquisition
//!
//! Fetches candidate PDFs concurrently, writes them under the papers
//! directory and flags the matching records as downloaded.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use secdigest_common::config::DownloadConfig;
use secdigest_common::errors::{AppError, Result};
use secdigest_common::metrics::record_download;
use secdigest_common::{PaperPatch, PaperRecord, PaperStore};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Bytes of a fetched document
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// URL after redirects
    pub final_url: String,
    pub bytes: Vec<u8>,
}

/// Single-document fetch
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument>;
}

/// HTTP fetcher with a fixed timeout and browser user agent
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        let failed = |message: String| AppError::Download {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;

        let final_url = response.url().to_string();
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

        Ok(FetchedDocument {
            final_url,
            bytes: bytes.to_vec(),
        })
    }
}

/// Local file name for a document URL, with exactly one `.pdf`
pub fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query.rsplit('/').next().unwrap_or_default();
    let name = if name.is_empty() { "document" } else { name };

    let mut name = name.to_string();
    while name.ends_with(".pdf.pdf") {
        name.truncate(name.len() - 4);
    }
    if !name.ends_with(".pdf") {
        name.push_str(".pdf");
    }
    name
}

/// Where a record's document lives under `dir`
pub fn document_path(dir: &Path, record: &PaperRecord) -> PathBuf {
    dir.join(filename_from_url(&record.url))
}

/// Outcome counts for one acquisition batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub requested: usize,
    pub saved: usize,
    pub failed: usize,
}

async fn save_document(dest_dir: &Path, record: &PaperRecord, doc: &FetchedDocument) -> Result<PathBuf> {
    let path = document_path(dest_dir, record);
    let write_failed = |e: std::io::Error| AppError::Download {
        url: record.url.clone(),
        message: format!("writing {} failed: {}", path.display(), e),
    };

    tokio::fs::create_dir_all(dest_dir).await.map_err(write_failed)?;
    tokio::fs::write(&path, &doc.bytes).await.map_err(write_failed)?;

    if doc.final_url != record.url {
        debug!(url = %record.url, final_url = %doc.final_url, "Download was redirected");
    }
    Ok(path)
}

/// Download every distinct candidate URL with at most `concurrency`
/// requests in flight. Individual failures are logged and counted; only a
/// store write failure aborts.
#[instrument(skip_all, fields(candidates = candidates.len(), concurrency))]
pub async fn download_many(
    fetcher: &dyn DocumentFetcher,
    candidates: &[PaperRecord],
    store: &mut PaperStore,
    dest_dir: &Path,
    concurrency: usize,
) -> Result<DownloadReport> {
    let mut seen = HashSet::new();
    let unique: Vec<&PaperRecord> = candidates
        .iter()
        .filter(|c| seen.insert(c.url.as_str()))
        .collect();

    let mut report = DownloadReport {
        requested: unique.len(),
        ..DownloadReport::default()
    };

    // each body is written and dropped as soon as its fetch completes
    let mut saved_stream = stream::iter(unique)
        .map(|candidate| async move {
            let saved = match fetcher.fetch(&candidate.url).await {
                Ok(doc) => save_document(dest_dir, candidate, &doc).await,
                Err(e) => Err(e),
            };
            (candidate, saved)
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((candidate, saved)) = saved_stream.next().await {
        match saved {
            Ok(path) => {
                store.update(&candidate.id, PaperPatch::new().downloaded(true))?;
                debug!(id = %candidate.id, path = %path.display(), "Saved document");
                record_download(true);
                report.saved += 1;
            }
            Err(e) => {
                error!(
                    id = %candidate.id,
                    url = %candidate.url,
                    code = e.code().as_code(),
                    error = %e,
                    "Failed result"
                );
                record_download(false);
                report.failed += 1;
            }
        }
    }

    info!(
        requested = report.requested,
        saved = report.saved,
        failed = report.failed,
        "Downloads finished"
    );
    Ok(report)
}

/// Fetch a single record's document on demand
pub async fn download_one(
    fetcher: &dyn DocumentFetcher,
    record: &PaperRecord,
    store: &mut PaperStore,
    dest_dir: &Path,
) -> Result<PathBuf> {
    debug!(url = %record.url, "Downloading");
    let doc = fetcher.fetch(&record.url).await;
    record_download(doc.is_ok());

    let path = save_document(dest_dir, record, &doc?).await?;
    store.update(&record.id, PaperPatch::new().downloaded(true))?;
    Ok(path)
}
