//! Ingestion: chunking, per-document orchestration, and batch runs over staged blobs.

pub mod batch;
pub mod chunking;
pub mod pipeline;
pub mod types;

pub use batch::{
    BatchOptions, BatchReport, BatchRunner, BatchSettings, FailedDocument, ProcessedMarker,
    ResetStatus,
};
pub use chunking::{DEFAULT_OVERLAP, DEFAULT_WINDOW_SIZE, chunk_pages};
pub use pipeline::{Pipeline, PipelineSettings, analyze_and_stage};
pub use types::{
    Chunk, ChunkingError, DocumentOutcome, EmptyReason, IndexedDocument, PipelineError,
};
