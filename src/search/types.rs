//! Shared types used by the search backend trait, its adapters, and callers.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors returned while interacting with the search backend.
#[derive(Debug, Error)]
pub enum SearchBackendError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid search endpoint URL: {0}")]
    InvalidUrl(String),
    /// The backend refused the request shape (unsupported feature, bad filter, bad field).
    #[error("Search backend rejected the request ({status}): {body}")]
    Rejected {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// The backend could not be reached or answered with a transient failure.
    #[error("Search backend unavailable: {0}")]
    Unavailable(String),
    /// Credentials were missing or refused.
    #[error("Search backend refused credentials ({status}): {body}")]
    Unauthorized {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// The addressed index or document does not exist.
    #[error("Search resource not found: {0}")]
    NotFound(String),
    /// A concurrent writer created the resource first.
    #[error("Search resource already exists: {0}")]
    Conflict(String),
    /// Some documents of an upload or delete batch were not accepted.
    #[error("{failed} of {total} documents were not accepted: {first_error}")]
    PartialFailure {
        /// Documents in the request.
        total: usize,
        /// Documents the backend refused.
        failed: usize,
        /// First per-document error message.
        first_error: String,
    },
    /// Response could not be decoded.
    #[error("Malformed search response: {0}")]
    InvalidResponse(String),
}

impl SearchBackendError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::Rejected { status, body }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized { status, body },
            StatusCode::NOT_FOUND => Self::NotFound(body),
            StatusCode::CONFLICT => Self::Conflict(body),
            StatusCode::TOO_MANY_REQUESTS => Self::Unavailable(format!("{status}: {body}")),
            status if status.is_server_error() => Self::Unavailable(format!("{status}: {body}")),
            status => Self::Rejected { status, body },
        }
    }

    /// Whether the backend refused the request shape rather than failing to serve it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Whether repeating the same idempotent request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for SearchBackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Unavailable(error.to_string())
        }
    }
}

/// Retrievable fields of an indexed chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredChunk {
    /// Index key.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: String,
    /// Publication year.
    pub year: i32,
    /// Publication month.
    pub month: u32,
    /// First page covered by the chunk.
    pub page_start: u32,
    /// Last page covered by the chunk.
    pub page_end: u32,
    /// Chunk text.
    pub text: String,
    /// Where the source document lives.
    pub source_locator: String,
}

/// Document written to the index: the stored fields plus the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Stored, retrievable fields.
    #[serde(flatten)]
    pub fields: StoredChunk,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// Structured filter constraints on the filterable index fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Exact publication year.
    #[serde(default)]
    pub year: Option<i32>,
    /// Exact publication month.
    #[serde(default)]
    pub month: Option<u32>,
    /// Exact document identifier.
    #[serde(default)]
    pub document_id: Option<String>,
}

impl SearchFilters {
    /// Document id constraint, trimmed; blank ids constrain nothing.
    pub fn document_id(&self) -> Option<&str> {
        self.document_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Whether no constraint is set.
    pub fn is_empty(&self) -> bool {
        self.year.is_none() && self.month.is_none() && self.document_id().is_none()
    }

    /// Whether a stored chunk satisfies every constraint.
    pub fn matches(&self, chunk: &StoredChunk) -> bool {
        self.year.is_none_or(|year| chunk.year == year)
            && self.month.is_none_or(|month| chunk.month == month)
            && self
                .document_id()
                .is_none_or(|document_id| chunk.document_id == document_id)
    }
}

/// One request against the index, shaped by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Full-text query; `*` matches everything.
    pub text: String,
    /// Optional query vector for a k-nearest-neighbour leg.
    pub vector: Option<Vec<f32>>,
    /// Maximum number of hits.
    pub top: usize,
    /// Optional filter constraints.
    pub filters: Option<SearchFilters>,
    /// Whether to request semantic reranking.
    pub semantic: bool,
    /// Whether to request the total match count.
    pub include_total_count: bool,
    /// Fields to compute facet counts for.
    pub facets: Vec<String>,
}

impl QueryRequest {
    /// Plain match-all request returning up to `top` documents.
    pub fn match_all(top: usize) -> Self {
        Self {
            text: "*".into(),
            vector: None,
            top,
            filters: None,
            semantic: false,
            include_total_count: false,
            facets: Vec::new(),
        }
    }
}

/// Scored hit returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Backend relevance score.
    pub score: f64,
    /// Semantic reranker score, when semantic ranking was applied.
    pub reranker_score: Option<f64>,
    /// Retrieved fields.
    pub chunk: StoredChunk,
}

/// Facet bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetCount {
    /// Field value of the bucket.
    pub value: Value,
    /// Documents in the bucket.
    pub count: u64,
}

/// Response to a [`QueryRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Hits in backend ranking order.
    pub hits: Vec<SearchHit>,
    /// Total matches, when requested and reported.
    pub total_count: Option<u64>,
    /// Facet buckets keyed by field name.
    pub facets: BTreeMap<String, Vec<FacetCount>>,
}
