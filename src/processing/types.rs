//! Core data types and error definitions for the ingestion pipeline.

use crate::{
    embedding::EmbeddingError, index::IndexError, ocr::NormalizeError, ocr::OcrError,
    storage::StorageError,
};
use serde::Serialize;
use thiserror::Error;

/// Errors produced while cutting page text into windows.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Window settings would not make forward progress.
    #[error("overlap ({overlap}) must be smaller than a non-zero window size ({window_size})")]
    InvalidWindow {
        /// Requested window size in characters.
        window_size: usize,
        /// Requested overlap in characters.
        overlap: usize,
    },
}

/// Errors that abort one document's pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// OCR output could not be interpreted.
    #[error("Failed to normalize OCR output: {0}")]
    Normalize(#[from] NormalizeError),
    /// Chunk window settings are invalid.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding failed and the failure policy does not tolerate it.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Schema check or upsert failed.
    #[error("Index request failed: {0}")]
    Index(#[from] IndexError),
    /// OCR service call failed.
    #[error("OCR request failed: {0}")]
    Ocr(#[from] OcrError),
    /// Blob storage read or write failed.
    #[error("Blob storage request failed: {0}")]
    Storage(#[from] StorageError),
    /// Staged OCR blob is not valid JSON.
    #[error("Staged document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Vectors of one document disagree on dimensionality.
    #[error("Embedding dimension mismatch for {chunk_id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Chunk whose vector disagrees.
        chunk_id: String,
        /// Dimensionality of the first vector.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },
}

/// One retrievable window of page text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Stable identifier derived from document, page and start offset.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: String,
    /// Publication year.
    pub year: i32,
    /// Publication month.
    pub month: u32,
    /// Page the chunk starts on.
    pub page_start: u32,
    /// Page the chunk ends on; chunks never span pages.
    pub page_end: u32,
    /// Window text.
    pub text: String,
    /// Pointer back to the original artifact.
    pub source_locator: String,
    /// Vector assigned by the embedding stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Why a document produced nothing to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    /// The normalizer produced no pages.
    NoPages,
    /// Every page was blank after trimming.
    NoChunks,
}

/// Counters for a document that reached the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedDocument {
    /// Document identifier.
    pub document_id: String,
    /// Pages produced by the normalizer.
    pub pages: usize,
    /// Chunks written to the index.
    pub chunks: usize,
    /// Documents acknowledged by the backend.
    pub acknowledged: usize,
    /// Chunks indexed with a zero-vector placeholder.
    pub degraded_chunks: usize,
    /// Dimensionality of the document's vectors.
    pub vector_dimension: usize,
}

/// Result of running one document through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    /// Chunks were embedded and written.
    Indexed(IndexedDocument),
    /// Nothing to index; no downstream stage ran.
    Empty {
        /// Stage that came up empty.
        reason: EmptyReason,
    },
}

impl DocumentOutcome {
    /// Chunks written, zero for empty outcomes.
    pub fn chunk_count(&self) -> usize {
        match self {
            Self::Indexed(document) => document.chunks,
            Self::Empty { .. } => 0,
        }
    }
}
