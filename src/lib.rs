#![deny(missing_docs)]

//! Core library for Periodex: OCR'd periodicals in, hybrid search index out.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding backends and the batching embedder.
pub mod embedding;
/// Search index schema ownership and batched writes.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// OCR collaborator and result normalization.
pub mod ocr;
/// Chunking, per-document orchestration, and batch runs.
pub mod processing;
/// Query engine with capability fallback.
pub mod query;
/// Bounded exponential backoff.
pub mod retry;
/// Search backend abstraction, Azure AI Search adapter, and in-memory fake.
pub mod search;
/// Blob storage for staged OCR results and processing markers.
pub mod storage;
