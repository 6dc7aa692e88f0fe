//! Batch ingestion of staged OCR blobs with a bounded worker pool.
//!
//! A blob is *pending* when it has no processed marker or its SHA-256 fingerprint differs from
//! the one recorded in the marker. Staged keys are queued to `max_workers` tasks, and each worker
//! reads its blob and compares fingerprints itself, so an unreadable blob fails alone without
//! affecting its siblings. Markers are written only after a document is indexed or found empty,
//! so failed documents are retried next run.

use super::pipeline::Pipeline;
use super::types::{DocumentOutcome, PipelineError};
use crate::config::Config;
use crate::ocr::DocumentMeta;
use crate::storage::BlobStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc};

/// Blob layout and concurrency settings for [`BatchRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Prefix under which staged OCR JSON blobs live.
    pub staging_prefix: String,
    /// Prefix under which processed markers are written.
    pub marker_prefix: String,
    /// Key of the one-time reset flag.
    pub reset_flag_key: String,
    /// Default worker count.
    pub max_workers: usize,
}

impl BatchSettings {
    /// Settings taken from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_prefix: config.staging_prefix.clone(),
            marker_prefix: config.marker_prefix.clone(),
            reset_flag_key: config.reset_flag_key.clone(),
            max_workers: config.max_workers,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Clear the index first unless the reset flag already exists.
    pub reset_once: bool,
    /// Worker count override.
    pub workers: Option<usize>,
}

/// What happened to the one-time reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResetStatus {
    /// The run did not ask for a reset.
    #[default]
    NotRequested,
    /// The flag already existed.
    AlreadyDone,
    /// The index was cleared and the flag written.
    Performed {
        /// Documents removed.
        removed: usize,
    },
    /// Clearing failed; the flag was not written and ingestion continued.
    Failed {
        /// Error message.
        error: String,
    },
}

/// A document that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDocument {
    /// Blob key.
    pub key: String,
    /// Error message.
    pub reason: String,
}

/// Totals for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Documents written to the index.
    pub indexed: usize,
    /// Documents with nothing to index.
    pub empty: usize,
    /// Blobs whose fingerprint matched their marker.
    pub skipped: usize,
    /// Chunks written across indexed documents.
    pub chunks: usize,
    /// Documents that failed, with reasons.
    pub failed: Vec<FailedDocument>,
    /// Outcome of the one-time reset.
    pub reset: ResetStatus,
}

/// Contents of a processed marker blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    /// Hex SHA-256 of the blob bytes that were processed.
    pub sha256: String,
    /// RFC 3339 time of processing.
    pub processed_at: String,
}

/// What a worker did with one staged blob.
#[derive(Debug)]
enum BlobOutcome {
    /// Fingerprint matched the marker.
    Unchanged,
    /// The document went through the pipeline.
    Processed(DocumentOutcome),
}

/// Result of one worker's attempt at one blob.
#[derive(Debug)]
struct DocumentReport {
    key: String,
    result: Result<BlobOutcome, PipelineError>,
}

/// Discovers pending blobs and feeds them through the pipeline.
#[derive(Clone)]
pub struct BatchRunner {
    pipeline: Pipeline,
    store: Arc<dyn BlobStore>,
    settings: BatchSettings,
}

impl BatchRunner {
    /// Assemble a runner.
    pub fn new(pipeline: Pipeline, store: Arc<dyn BlobStore>, settings: BatchSettings) -> Self {
        Self {
            pipeline,
            store,
            settings,
        }
    }

    /// Process every pending staged blob.
    pub async fn run(&self, options: BatchOptions) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::default();
        if options.reset_once {
            report.reset = self.reset_once().await?;
        }

        let staged = self.scan().await?;
        let workers = options
            .workers
            .unwrap_or(self.settings.max_workers)
            .clamp(1, staged.len().max(1));
        tracing::info!(staged = staged.len(), workers, "Starting batch ingestion");

        for document in self.dispatch(staged, workers).await {
            match document.result {
                Ok(BlobOutcome::Unchanged) => report.skipped += 1,
                Ok(BlobOutcome::Processed(DocumentOutcome::Indexed(indexed))) => {
                    report.indexed += 1;
                    report.chunks += indexed.chunks;
                }
                Ok(BlobOutcome::Processed(DocumentOutcome::Empty { reason })) => {
                    tracing::info!(key = %document.key, reason = ?reason, "Document produced nothing to index");
                    report.empty += 1;
                }
                Err(error) => {
                    tracing::error!(key = %document.key, error = %error, "Document failed");
                    report.failed.push(FailedDocument {
                        key: document.key,
                        reason: error.to_string(),
                    });
                }
            }
        }
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));

        tracing::info!(
            indexed = report.indexed,
            empty = report.empty,
            skipped = report.skipped,
            failed = report.failed.len(),
            chunks = report.chunks,
            metrics = ?self.pipeline.metrics().snapshot(),
            "Batch ingestion finished"
        );
        Ok(report)
    }

    /// Clear the index once per deployment, guarded by the flag blob.
    async fn reset_once(&self) -> Result<ResetStatus, PipelineError> {
        if self.store.exists(&self.settings.reset_flag_key).await? {
            tracing::debug!(flag = %self.settings.reset_flag_key, "Reset flag present; skipping reset");
            return Ok(ResetStatus::AlreadyDone);
        }

        match self.pipeline.index().clear().await {
            Ok(removed) => {
                self.store.write(&self.settings.reset_flag_key, b"").await?;
                tracing::info!(removed, flag = %self.settings.reset_flag_key, "Index reset; flag written");
                Ok(ResetStatus::Performed { removed })
            }
            Err(error) => {
                tracing::error!(error = %error, "Index reset failed; continuing without flag");
                Ok(ResetStatus::Failed {
                    error: error.to_string(),
                })
            }
        }
    }

    /// Staged OCR JSON keys, excluding markers.
    async fn scan(&self) -> Result<Vec<String>, PipelineError> {
        let keys = self.store.list(&self.settings.staging_prefix).await?;
        Ok(keys
            .into_iter()
            .filter(|key| key.ends_with(".json") && !key.starts_with(&self.settings.marker_prefix))
            .collect())
    }

    async fn read_marker(&self, key: &str) -> Option<ProcessedMarker> {
        let marker_key = self.marker_key(key);
        let bytes = match self.store.read(&marker_key).await {
            Ok(bytes) => bytes,
            Err(crate::storage::StorageError::NotFound(_)) => return None,
            Err(error) => {
                tracing::warn!(key = %marker_key, error = %error, "Unreadable marker; treating blob as pending");
                return None;
            }
        };
        serde_json::from_slice(&bytes)
            .inspect_err(|error| {
                tracing::warn!(key = %marker_key, error = %error, "Malformed marker; treating blob as pending");
            })
            .ok()
    }

    fn marker_key(&self, key: &str) -> String {
        format!("{}{key}.json", self.settings.marker_prefix)
    }

    /// Run tasks on `workers` pool members and collect one report per task.
    async fn dispatch(&self, tasks: Vec<String>, workers: usize) -> Vec<DocumentReport> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let (task_tx, task_rx) = mpsc::channel::<String>(workers * 2);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<DocumentReport>();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let runner = self.clone();
            let task_rx = Arc::clone(&task_rx);
            let report_tx = report_tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = task_rx.lock().await.recv().await;
                    let Some(key) = next else { break };
                    tracing::debug!(worker, key = %key, "Worker picked up document");
                    let result = runner.process_blob(&key).await;
                    let report = DocumentReport { key, result };
                    if report_tx.send(report).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(report_tx);

        for task in tasks {
            if task_tx.send(task).await.is_err() {
                tracing::error!("All workers exited before the queue drained");
                break;
            }
        }
        drop(task_tx);

        let mut reports = Vec::new();
        while let Some(report) = report_rx.recv().await {
            reports.push(report);
        }
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "Ingestion worker panicked");
            }
        }
        reports
    }

    async fn process_blob(&self, key: &str) -> Result<BlobOutcome, PipelineError> {
        let bytes = self.store.read(key).await?;
        let fingerprint = fingerprint(&bytes);
        if self
            .read_marker(key)
            .await
            .is_some_and(|marker| marker.sha256 == fingerprint)
        {
            tracing::debug!(key, "Fingerprint unchanged; skipping");
            return Ok(BlobOutcome::Unchanged);
        }

        let document: serde_json::Value = serde_json::from_slice(&bytes)?;
        let meta = derive_meta(key, self.store.locator(key));
        let outcome = self.pipeline.process_document(&document, &meta).await?;

        let marker = ProcessedMarker {
            sha256: fingerprint,
            processed_at: current_timestamp_rfc3339(),
        };
        self.store
            .write(&self.marker_key(key), &serde_json::to_vec(&marker)?)
            .await?;
        Ok(BlobOutcome::Processed(outcome))
    }
}

/// Hex SHA-256 of blob contents.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Document id, year and month from a blob key such as `extracted-json/1923-04-gazette.json`.
///
/// The id is the file name without `.json`; year and month are its first two `-`-separated
/// parts, or `0`/`0` when those are not numbers.
pub fn derive_meta(key: &str, source_locator: String) -> DocumentMeta {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let document_id = file_name
        .strip_suffix(".json")
        .unwrap_or(file_name)
        .to_string();

    let mut parts = document_id.split('-');
    let parsed = match (parts.next(), parts.next()) {
        (Some(year), Some(month)) => year.parse::<i32>().ok().zip(month.parse::<u32>().ok()),
        _ => None,
    };
    let (year, month) = parsed.unwrap_or_else(|| {
        tracing::warn!(key, "Cannot derive year/month from blob name; using 0/0");
        (0, 0)
    });

    DocumentMeta {
        document_id,
        year,
        month,
        source_locator,
    }
}

fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
