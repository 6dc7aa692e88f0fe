//! Index management: schema ownership, batched idempotent upsert, reset, and statistics.
//!
//! Upserts are merge-or-upload keyed by `chunk_id`, so re-running a document replaces its
//! chunks in place. Batches are written in order; a batch that fails after retries stops the
//! remaining batches, and batches already acknowledged stay committed.

use crate::config::Config;
use crate::processing::Chunk;
use crate::retry::{RetryError, RetryPolicy};
use crate::search::{
    FacetCount, IndexDocument, IndexSchema, QueryRequest, SearchBackend, SearchBackendError,
    StoredChunk,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Keys fetched per page while clearing the index.
const CLEAR_PAGE_SIZE: usize = 1000;
/// Pages of already-deleted keys tolerated before giving up on the index catching up.
const CLEAR_MAX_STALE_PAGES: u32 = 5;
/// Pause before re-reading a page that only listed already-deleted keys.
const CLEAR_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Errors raised by the index manager.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The existing index was built for a different vector dimensionality.
    #[error("Index schema conflict: existing vector dimension {existing:?}, requested {requested}")]
    SchemaConflict {
        /// Dimension recorded in the existing schema, if any.
        existing: Option<usize>,
        /// Dimension the caller needs.
        requested: usize,
    },
    /// A chunk reached the upsert stage without a vector.
    #[error("Chunk {chunk_id} has no embedding")]
    MissingEmbedding {
        /// Offending chunk.
        chunk_id: String,
    },
    /// Backend error, surfaced verbatim.
    #[error(transparent)]
    Backend(#[from] SearchBackendError),
}

/// What `ensure_schema` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// The index was created by this call.
    Created,
    /// A compatible index already existed.
    Existing,
}

/// Acknowledgements from one `upsert` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    /// Documents acknowledged per batch, in write order.
    pub batches: Vec<usize>,
    /// Sum of `batches`.
    pub acknowledged: usize,
}

/// Snapshot of index contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    /// Documents in the index.
    pub document_count: u64,
    /// Document counts per publication year.
    pub years: Vec<FacetCount>,
    /// Document counts per publication month.
    pub months: Vec<FacetCount>,
    /// One stored record, when the index is not empty.
    pub sample: Option<StoredChunk>,
}

/// Owns the chunk index schema and writes chunk documents.
#[derive(Clone)]
pub struct IndexManager {
    backend: Arc<dyn SearchBackend>,
    index_name: String,
    batch_size: usize,
    retry: RetryPolicy,
}

impl IndexManager {
    /// Build a manager over `backend` with explicit settings.
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        index_name: impl Into<String>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            index_name: index_name.into(),
            batch_size: batch_size.clamp(1, crate::config::MAX_UPSERT_BATCH_SIZE),
            retry,
        }
    }

    /// Build a manager using the index name, batch size and retry settings from configuration.
    pub fn from_config(backend: Arc<dyn SearchBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            config.search_index_name.clone(),
            config.upsert_batch_size,
            RetryPolicy::new(config.embedding_max_retries, config.embedding_backoff_base),
        )
    }

    /// Shared backend handle.
    pub fn backend(&self) -> Arc<dyn SearchBackend> {
        Arc::clone(&self.backend)
    }

    /// Make sure the index exists with a vector field of `vector_dimension` components.
    ///
    /// Never alters an existing index: a different dimensionality is a
    /// [`IndexError::SchemaConflict`].
    pub async fn ensure_schema(&self, vector_dimension: usize) -> Result<SchemaStatus, IndexError> {
        if let Some(existing) = self.backend.fetch_schema().await? {
            return Self::check_dimension(&existing, vector_dimension)
                .map(|_| SchemaStatus::Existing);
        }

        let schema = IndexSchema::for_chunks(&self.index_name, vector_dimension);
        match self.backend.create_schema(&schema).await {
            Ok(()) => {
                tracing::info!(
                    index = %self.index_name,
                    dimension = vector_dimension,
                    "Created search index"
                );
                Ok(SchemaStatus::Created)
            }
            Err(SearchBackendError::Conflict(_)) => {
                tracing::debug!(index = %self.index_name, "Index created concurrently; re-checking");
                let existing = self.backend.fetch_schema().await?.ok_or_else(|| {
                    SearchBackendError::NotFound(format!(
                        "index {} vanished after a create conflict",
                        self.index_name
                    ))
                })?;
                Self::check_dimension(&existing, vector_dimension).map(|_| SchemaStatus::Existing)
            }
            Err(error) => Err(error.into()),
        }
    }

    fn check_dimension(existing: &IndexSchema, requested: usize) -> Result<(), IndexError> {
        match existing.vector_dimension() {
            Some(dimension) if dimension == requested => Ok(()),
            existing => {
                tracing::error!(existing = ?existing, requested, "Index vector dimension differs");
                Err(IndexError::SchemaConflict {
                    existing,
                    requested,
                })
            }
        }
    }

    /// Merge-or-upload chunks in batches of at most the configured batch size.
    pub async fn upsert(&self, chunks: &[Chunk]) -> Result<UpsertReport, IndexError> {
        let documents = chunks
            .iter()
            .map(to_index_document)
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = UpsertReport::default();
        for (index, batch) in documents.chunks(self.batch_size).enumerate() {
            let start = index * self.batch_size;
            let label = format!("upsert batch {}..{}", start, start + batch.len());
            let acknowledged = self
                .retry
                .run(&label, SearchBackendError::is_transient, || {
                    self.backend.upload(batch)
                })
                .await
                .map_err(|error| match error {
                    RetryError::Fatal(error) | RetryError::Exhausted { last: error, .. } => error,
                })
                .inspect_err(|error| {
                    tracing::error!(
                        index = %self.index_name,
                        batch = index,
                        committed_batches = report.batches.len(),
                        error = %error,
                        "Upsert batch failed; remaining batches skipped"
                    );
                })?;

            report.batches.push(acknowledged);
            report.acknowledged += acknowledged;
        }

        tracing::debug!(
            index = %self.index_name,
            batches = report.batches.len(),
            acknowledged = report.acknowledged,
            "Upsert completed"
        );
        Ok(report)
    }

    /// Delete every document from the index, returning how many distinct keys were removed.
    ///
    /// The search service is near-real-time: a page read right after a delete may still list
    /// deleted keys. Those are never deleted or counted twice.
    pub async fn clear(&self) -> Result<usize, IndexError> {
        if self.backend.fetch_schema().await?.is_none() {
            tracing::info!(index = %self.index_name, "Index missing; nothing to clear");
            return Ok(0);
        }

        let mut deleted_keys = HashSet::new();
        let mut removed = 0;
        let mut stale_pages = 0;
        loop {
            let page = self
                .backend
                .query(&QueryRequest::match_all(CLEAR_PAGE_SIZE))
                .await?;
            if page.hits.is_empty() {
                break;
            }
            let keys: Vec<String> = page
                .hits
                .into_iter()
                .map(|hit| hit.chunk.chunk_id)
                .filter(|key| !deleted_keys.contains(key))
                .collect();
            if keys.is_empty() {
                stale_pages += 1;
                if stale_pages > CLEAR_MAX_STALE_PAGES {
                    tracing::warn!(index = %self.index_name, removed, "Index keeps listing deleted keys; stopping");
                    break;
                }
                tracing::debug!(index = %self.index_name, stale_pages, "Only deleted keys listed; waiting for refresh");
                tokio::time::sleep(CLEAR_REFRESH_DELAY).await;
                continue;
            }
            stale_pages = 0;

            let deleted = self.backend.delete(&keys).await?;
            if deleted == 0 {
                tracing::warn!(index = %self.index_name, pending = keys.len(), "Delete acknowledged nothing; stopping");
                break;
            }
            removed += deleted.min(keys.len());
            deleted_keys.extend(keys);
        }

        tracing::info!(index = %self.index_name, removed, "Cleared search index");
        Ok(removed)
    }

    /// Document count, year and month facets, and one sample record.
    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let document_count = self.backend.document_count().await?;
        let mut request = QueryRequest::match_all(1);
        request.facets = vec!["year".into(), "month".into()];
        let mut response = self.backend.query(&request).await?;

        Ok(IndexStats {
            document_count,
            years: response.facets.remove("year").unwrap_or_default(),
            months: response.facets.remove("month").unwrap_or_default(),
            sample: response.hits.into_iter().next().map(|hit| hit.chunk),
        })
    }
}

fn to_index_document(chunk: &Chunk) -> Result<IndexDocument, IndexError> {
    let embedding = chunk
        .embedding
        .clone()
        .ok_or_else(|| IndexError::MissingEmbedding {
            chunk_id: chunk.chunk_id.clone(),
        })?;
    Ok(IndexDocument {
        fields: StoredChunk {
            chunk_id: chunk.chunk_id.clone(),
            document_id: chunk.document_id.clone(),
            year: chunk.year,
            month: chunk.month,
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            text: chunk.text.clone(),
            source_locator: chunk.source_locator.clone(),
        },
        embedding,
    })
}
