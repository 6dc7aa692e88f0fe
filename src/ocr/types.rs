//! Shapes of the OCR documents accepted by the normalizer and the page records it emits.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while interpreting an OCR document.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The document matches neither the span-based nor the pre-extracted layout.
    #[error("Unsupported OCR format: {0}")]
    UnsupportedFormat(String),
}

/// One OCR'd page of one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Stable external identifier of the source document.
    pub document_id: String,
    /// Publication year.
    pub year: i32,
    /// Publication month.
    pub month: u32,
    /// 1-based page number copied verbatim from the OCR result.
    pub page_number: u32,
    /// Unit of the page geometry (`pixel`, `inch`, ...).
    pub unit: Option<String>,
    /// Page width in `unit`.
    pub width: Option<f64>,
    /// Page height in `unit`.
    pub height: Option<f64>,
    /// Clockwise skew of the page in degrees.
    pub angle: Option<f64>,
    /// Reconstructed page text.
    pub content: String,
    /// Mean word confidence in `[0, 1]`; `None` when the source reports no confidences.
    pub confidence_avg: Option<f64>,
    /// Share of words below [`super::LOW_CONFIDENCE_THRESHOLD`]; `None` when unmeasured.
    pub low_confidence_ratio: Option<f64>,
    /// Pointer back to the original artifact.
    pub source_locator: String,
    /// OCR model that produced the page.
    pub ocr_model_id: Option<String>,
    /// OCR API version that produced the page.
    pub ocr_api_version: Option<String>,
}

/// Provenance and partition keys attached to every page of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    /// Stable external identifier.
    pub document_id: String,
    /// Publication year.
    pub year: i32,
    /// Publication month.
    pub month: u32,
    /// Pointer back to the original artifact.
    pub source_locator: String,
}

/// Root of a span-based OCR result (`{"analyzeResult": {...}}`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnalyzeEnvelope {
    pub(crate) analyze_result: AnalyzeResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnalyzeResult {
    #[serde(default)]
    pub(crate) model_id: Option<String>,
    #[serde(default)]
    pub(crate) api_version: Option<String>,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) pages: Vec<AnalyzedPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnalyzedPage {
    pub(crate) page_number: u32,
    #[serde(default)]
    pub(crate) unit: Option<String>,
    #[serde(default)]
    pub(crate) width: Option<f64>,
    #[serde(default)]
    pub(crate) height: Option<f64>,
    #[serde(default)]
    pub(crate) angle: Option<f64>,
    #[serde(default)]
    pub(crate) words: Option<Vec<Word>>,
    #[serde(default)]
    pub(crate) spans: Option<Vec<Span>>,
    #[serde(default)]
    pub(crate) content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Word {
    #[serde(default)]
    pub(crate) confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct Span {
    #[serde(default)]
    pub(crate) offset: usize,
    #[serde(default)]
    pub(crate) length: usize,
}

/// Root of a pre-extracted document (`{"pages": [{"page_number": 1, "content": "..."}]}`).
#[derive(Debug, Deserialize)]
pub(crate) struct ExtractedDocument {
    pub(crate) pages: Vec<ExtractedPage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExtractedPage {
    #[serde(default)]
    pub(crate) page_number: u32,
    #[serde(default)]
    pub(crate) unit: Option<String>,
    #[serde(default)]
    pub(crate) width: Option<f64>,
    #[serde(default)]
    pub(crate) height: Option<f64>,
    #[serde(default)]
    pub(crate) angle: Option<f64>,
    #[serde(default)]
    pub(crate) content: Option<String>,
}
