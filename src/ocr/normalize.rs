//! Conversion of raw OCR documents into ordered [`PageRecord`]s.
//!
//! Two layouts are understood:
//!
//! - **Span based**: `{"analyzeResult": {"content": "...", "pages": [...]}}`. Page text is
//!   rebuilt from the document-level `content` using each page's `spans` (offset + length,
//!   counted in Unicode scalar values). Word confidences feed the page quality statistics.
//! - **Pre-extracted**: `{"pages": [{"page_number": 1, "content": "..."}]}`. Text is taken
//!   verbatim and the quality statistics stay unmeasured.
//!
//! Anything else fails with [`NormalizeError::UnsupportedFormat`] and yields no pages.

use serde::Deserialize;
use serde_json::Value;

use super::types::{
    AnalyzeEnvelope, AnalyzeResult, AnalyzedPage, DocumentMeta, ExtractedDocument,
    NormalizeError, PageRecord, Span, Word,
};

/// Words with a confidence strictly below this value count as low confidence.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Normalize one OCR document into page records, preserving the OCR page order.
pub fn normalize(document: &Value, meta: &DocumentMeta) -> Result<Vec<PageRecord>, NormalizeError> {
    let Some(root) = document.as_object() else {
        return Err(NormalizeError::UnsupportedFormat(
            "expected a JSON object at the document root".into(),
        ));
    };

    if root.contains_key("analyzeResult") {
        let envelope = AnalyzeEnvelope::deserialize(document).map_err(|err| {
            NormalizeError::UnsupportedFormat(format!("malformed analyzeResult: {err}"))
        })?;
        Ok(normalize_analyzed(envelope.analyze_result, meta))
    } else if root.contains_key("pages") {
        let extracted = ExtractedDocument::deserialize(document).map_err(|err| {
            NormalizeError::UnsupportedFormat(format!("malformed pre-extracted pages: {err}"))
        })?;
        Ok(normalize_extracted(extracted, meta))
    } else {
        Err(NormalizeError::UnsupportedFormat(
            "document has neither `analyzeResult` nor `pages`".into(),
        ))
    }
}

fn normalize_analyzed(result: AnalyzeResult, meta: &DocumentMeta) -> Vec<PageRecord> {
    let AnalyzeResult {
        model_id,
        api_version,
        content,
        pages,
    } = result;
    let characters: Vec<char> = content.chars().collect();

    pages
        .into_iter()
        .map(|page| {
            let AnalyzedPage {
                page_number,
                unit,
                width,
                height,
                angle,
                words,
                spans,
                content: page_content,
            } = page;

            let (confidence_avg, low_confidence_ratio) = confidence_stats(words.as_deref());
            let content = match spans {
                Some(spans) => slice_spans(&characters, &spans),
                None => page_content.unwrap_or_default(),
            };

            PageRecord {
                document_id: meta.document_id.clone(),
                year: meta.year,
                month: meta.month,
                page_number,
                unit,
                width,
                height,
                angle,
                content,
                confidence_avg,
                low_confidence_ratio,
                source_locator: meta.source_locator.clone(),
                ocr_model_id: model_id.clone(),
                ocr_api_version: api_version.clone(),
            }
        })
        .collect()
}

fn normalize_extracted(document: ExtractedDocument, meta: &DocumentMeta) -> Vec<PageRecord> {
    document
        .pages
        .into_iter()
        .map(|page| PageRecord {
            document_id: meta.document_id.clone(),
            year: meta.year,
            month: meta.month,
            page_number: page.page_number,
            unit: page.unit,
            width: page.width,
            height: page.height,
            angle: page.angle,
            content: page.content.unwrap_or_default(),
            confidence_avg: None,
            low_confidence_ratio: None,
            source_locator: meta.source_locator.clone(),
            ocr_model_id: None,
            ocr_api_version: None,
        })
        .collect()
}

/// Concatenate the substrings addressed by `spans`, clamping spans that run past the end.
fn slice_spans(characters: &[char], spans: &[Span]) -> String {
    let mut text = String::new();
    for span in spans {
        let start = span.offset.min(characters.len());
        let end = span.offset.saturating_add(span.length).min(characters.len());
        text.extend(&characters[start..end]);
    }
    text
}

/// Mean confidence and low-confidence share, both rounded to three decimals.
///
/// A page with zero words is measured and maximally untrustworthy (`0.0`, `1.0`). A page
/// without a word list, or whose words carry no confidence at all, is unmeasured.
fn confidence_stats(words: Option<&[Word]>) -> (Option<f64>, Option<f64>) {
    let Some(words) = words else {
        return (None, None);
    };
    if words.is_empty() {
        return (Some(0.0), Some(1.0));
    }
    if words.iter().all(|word| word.confidence.is_none()) {
        return (None, None);
    }

    let total = words.len() as f64;
    let confidences = words.iter().map(|word| word.confidence.unwrap_or(0.0));
    let sum: f64 = confidences.clone().sum();
    let low = confidences
        .filter(|confidence| *confidence < LOW_CONFIDENCE_THRESHOLD)
        .count() as f64;

    (Some(round3(sum / total)), Some(round3(low / total)))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
