//! Per-document orchestration: normalize, chunk, embed, ensure schema, upsert.
//!
//! Stages run strictly in sequence; each consumes the previous stage's full output. An empty
//! stage result ends the run with [`DocumentOutcome::Empty`] before any embedding or index
//! call is made.

use super::chunking::chunk_pages;
use super::types::{Chunk, DocumentOutcome, EmptyReason, IndexedDocument, PipelineError};
use crate::config::{Config, EmbeddingFailurePolicy};
use crate::embedding::Embedder;
use crate::index::IndexManager;
use crate::metrics::PipelineMetrics;
use crate::ocr::{DocumentMeta, DocumentSource, OcrBackend, normalize};
use crate::storage::BlobStore;
use serde_json::Value;
use std::sync::Arc;

/// Chunking and failure-policy settings for [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Window size in characters.
    pub window_size: usize,
    /// Overlap between windows in characters.
    pub overlap: usize,
    /// What to do when an embedding batch fails after retries.
    pub failure_policy: EmbeddingFailurePolicy,
    /// Dimensionality of placeholder vectors when no batch succeeded to copy it from.
    pub embedding_dimension: usize,
}

impl PipelineSettings {
    /// Settings taken from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_size: config.chunk_window_size,
            overlap: config.chunk_overlap,
            failure_policy: config.embedding_failure_policy,
            embedding_dimension: config.embedding_dimension,
        }
    }
}

/// Runs documents through every ingestion stage.
#[derive(Clone)]
pub struct Pipeline {
    embedder: Embedder,
    index: IndexManager,
    settings: PipelineSettings,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Assemble a pipeline from its components.
    pub fn new(embedder: Embedder, index: IndexManager, settings: PipelineSettings) -> Self {
        Self {
            embedder,
            index,
            settings,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Index manager used for writes.
    pub fn index(&self) -> &IndexManager {
        &self.index
    }

    /// Counters accumulated by this pipeline and its clones.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run one OCR document through the pipeline.
    pub async fn process_document(
        &self,
        ocr_document: &Value,
        meta: &DocumentMeta,
    ) -> Result<DocumentOutcome, PipelineError> {
        let outcome = self.run(ocr_document, meta).await;
        match &outcome {
            Ok(DocumentOutcome::Indexed(indexed)) => self
                .metrics
                .record_indexed(indexed.chunks as u64, indexed.degraded_chunks as u64),
            Ok(DocumentOutcome::Empty { .. }) => self.metrics.record_empty(),
            Err(_) => self.metrics.record_failed(),
        }
        outcome
    }

    async fn run(
        &self,
        ocr_document: &Value,
        meta: &DocumentMeta,
    ) -> Result<DocumentOutcome, PipelineError> {
        let pages = normalize(ocr_document, meta)?;
        if pages.is_empty() {
            tracing::info!(document_id = %meta.document_id, "No pages; skipping document");
            return Ok(DocumentOutcome::Empty {
                reason: EmptyReason::NoPages,
            });
        }

        let mut chunks = chunk_pages(&pages, self.settings.window_size, self.settings.overlap)?;
        if chunks.is_empty() {
            tracing::info!(document_id = %meta.document_id, pages = pages.len(), "No chunks; skipping document");
            return Ok(DocumentOutcome::Empty {
                reason: EmptyReason::NoChunks,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let (vectors, degraded_chunks) = self.embed(&meta.document_id, &texts).await?;
        let vector_dimension = attach_embeddings(&mut chunks, vectors)?;

        self.index.ensure_schema(vector_dimension).await?;
        let report = self.index.upsert(&chunks).await?;

        tracing::info!(
            document_id = %meta.document_id,
            pages = pages.len(),
            chunks = chunks.len(),
            acknowledged = report.acknowledged,
            degraded_chunks,
            "Document indexed"
        );
        Ok(DocumentOutcome::Indexed(IndexedDocument {
            document_id: meta.document_id.clone(),
            pages: pages.len(),
            chunks: chunks.len(),
            acknowledged: report.acknowledged,
            degraded_chunks,
            vector_dimension,
        }))
    }

    /// Embed chunk texts under the configured failure policy; returns vectors and the number
    /// of placeholder vectors substituted.
    async fn embed(
        &self,
        document_id: &str,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, usize), PipelineError> {
        match self.settings.failure_policy {
            EmbeddingFailurePolicy::Abort => Ok((self.embedder.embed(texts).await?, 0)),
            EmbeddingFailurePolicy::ZeroVector => {
                let outcomes = self.embedder.embed_batches(texts).await;
                let dimension = outcomes
                    .iter()
                    .find_map(|batch| batch.result.as_ref().ok())
                    .and_then(|vectors| vectors.first())
                    .map_or(self.settings.embedding_dimension, Vec::len);

                let mut vectors = Vec::with_capacity(texts.len());
                let mut degraded = 0;
                for batch in outcomes {
                    match batch.result {
                        Ok(batch_vectors) => vectors.extend(batch_vectors),
                        Err(error) => {
                            let count = batch.range.len();
                            tracing::warn!(
                                document_id,
                                start = batch.range.start,
                                end = batch.range.end,
                                error = %error,
                                "Embedding batch failed; indexing zero vectors"
                            );
                            vectors.extend(std::iter::repeat_n(vec![0.0; dimension], count));
                            degraded += count;
                        }
                    }
                }
                Ok((vectors, degraded))
            }
        }
    }
}

/// Attach vectors to chunks in order; returns the shared dimensionality.
fn attach_embeddings(chunks: &mut [Chunk], vectors: Vec<Vec<f32>>) -> Result<usize, PipelineError> {
    let expected = vectors
        .first()
        .map(Vec::len)
        .unwrap_or(0);
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        if vector.len() != expected {
            return Err(PipelineError::DimensionMismatch {
                chunk_id: chunk.chunk_id.clone(),
                expected,
                actual: vector.len(),
            });
        }
        chunk.embedding = Some(vector);
    }
    Ok(expected)
}

/// Send a document through the OCR service and stage the raw result under `staging_key`.
pub async fn analyze_and_stage(
    ocr: &dyn OcrBackend,
    store: &dyn BlobStore,
    source: &DocumentSource,
    staging_key: &str,
) -> Result<Value, PipelineError> {
    let result = ocr.analyze(source).await?;
    let bytes = serde_json::to_vec(&result)?;
    store.write(staging_key, &bytes).await?;
    tracing::info!(key = staging_key, bytes = bytes.len(), "Staged OCR result");
    Ok(result)
}
