//! OCR result handling: document shapes, the normalizer, and the OCR service adapter.

pub mod client;
pub mod normalize;
pub mod types;

pub use client::{DocumentIntelligenceClient, DocumentSource, OcrBackend, OcrError};
pub use normalize::{LOW_CONFIDENCE_THRESHOLD, normalize};
pub use types::{DocumentMeta, NormalizeError, PageRecord};
