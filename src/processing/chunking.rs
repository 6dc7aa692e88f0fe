//! Fixed-size character windows over page text.
//!
//! Each page is trimmed and cut into windows of `window_size` Unicode scalar values. The
//! window start advances to `end - overlap` until a window reaches the end of the text, so
//! starts are `0, W-O, 2(W-O), ...` and the last window ends exactly at the text length.
//! Chunks never span pages.

use super::types::{Chunk, ChunkingError};
use crate::ocr::PageRecord;

/// Default window size in characters.
pub const DEFAULT_WINDOW_SIZE: usize = 900;
/// Default overlap between adjacent windows in characters.
pub const DEFAULT_OVERLAP: usize = 120;

/// Cut every page into overlapping windows, in page order.
pub fn chunk_pages(
    pages: &[PageRecord],
    window_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    if window_size == 0 || overlap >= window_size {
        return Err(ChunkingError::InvalidWindow {
            window_size,
            overlap,
        });
    }

    let mut chunks = Vec::new();
    for page in pages {
        let characters: Vec<char> = page.content.trim().chars().collect();
        for (start, end) in window_bounds(characters.len(), window_size, overlap) {
            let text: String = characters[start..end].iter().collect();
            // A window can land entirely inside a whitespace run.
            if text.trim().is_empty() {
                continue;
            }
            chunks.push(Chunk {
                chunk_id: chunk_id(&page.document_id, page.page_number, start),
                document_id: page.document_id.clone(),
                year: page.year,
                month: page.month,
                page_start: page.page_number,
                page_end: page.page_number,
                text,
                source_locator: page.source_locator.clone(),
                embedding: None,
            });
        }
    }

    tracing::debug!(
        pages = pages.len(),
        chunks = chunks.len(),
        window_size,
        overlap,
        "Chunked pages"
    );
    Ok(chunks)
}

/// Index key for the window of `page_number` starting at character `start`.
///
/// Whitespace is replaced with `_` so the key is safe for the search service.
pub fn chunk_id(document_id: &str, page_number: u32, start: usize) -> String {
    format!("{document_id}_p{page_number}_o{start}")
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn window_bounds(length: usize, window_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut start = 0;
    while start < length {
        let end = (start + window_size).min(length);
        bounds.push((start, end));
        if end == length {
            break;
        }
        start = end.saturating_sub(overlap);
    }
    bounds
}
