//! Query engine: hybrid search with capability fallback.
//!
//! A query walks [`QueryMode::LADDER`] from the richest request shape to the simplest. The
//! next mode is tried only when the backend *rejects* the current shape (HTTP 400/422);
//! unavailability, auth failures and embedding failures end the query immediately.

mod service;

pub use service::{SearchApi, SearchRequest, SearchService};

use crate::embedding::{Embedder, EmbeddingError};
use crate::index::IndexError;
use crate::search::{QueryRequest, SearchBackend, SearchBackendError, SearchFilters, SearchHit};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Characters kept in a result snippet.
pub const SNIPPET_CHARS: usize = 250;
/// Marker appended to truncated snippets.
pub const TRUNCATION_MARKER: &str = "...";

/// Errors emitted while answering a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Query text was blank.
    #[error("query text must not be empty")]
    EmptyQuery,
    /// The query vector could not be computed.
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Backend failed for a reason other than rejecting the request shape.
    #[error("Search request failed: {0}")]
    Backend(#[from] SearchBackendError),
    /// Every mode of the ladder was rejected.
    #[error("Search backend rejected every query mode ({attempted:?})")]
    AllModesRejected {
        /// Modes tried, in order.
        attempted: Vec<QueryMode>,
        /// Rejection returned for the last mode.
        #[source]
        last: Option<SearchBackendError>,
    },
    /// Index statistics could not be gathered.
    #[error("Index request failed: {0}")]
    Index(#[from] IndexError),
}

/// Query shapes, richest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Vector + full text + filters + semantic reranking.
    Semantic,
    /// Vector + full text + filters.
    VectorKeyword,
    /// Vector + full text, filters dropped.
    VectorKeywordUnfiltered,
}

impl QueryMode {
    /// Order in which modes are attempted.
    pub const LADDER: [QueryMode; 3] = [
        QueryMode::Semantic,
        QueryMode::VectorKeyword,
        QueryMode::VectorKeywordUnfiltered,
    ];

    /// Stable name used in logs and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::VectorKeyword => "vector_keyword",
            Self::VectorKeywordUnfiltered => "vector_keyword_unfiltered",
        }
    }

    /// Backend request for this mode, or `None` when the mode would repeat the previous one.
    fn request(
        self,
        text: &str,
        vector: &[f32],
        top: usize,
        filters: Option<&SearchFilters>,
    ) -> Option<QueryRequest> {
        let filters = match self {
            Self::Semantic | Self::VectorKeyword => filters.cloned(),
            Self::VectorKeywordUnfiltered if filters.is_none() => return None,
            Self::VectorKeywordUnfiltered => None,
        };
        Some(QueryRequest {
            text: text.to_string(),
            vector: Some(vector.to_vec()),
            top,
            filters,
            semantic: self == Self::Semantic,
            include_total_count: true,
            facets: Vec::new(),
        })
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    /// 1-based position.
    pub rank: usize,
    /// Backend relevance score.
    pub score: f64,
    /// Semantic reranker score, when semantic ranking served the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker_score: Option<f64>,
    /// Chunk key.
    pub chunk_id: String,
    /// Owning document.
    pub document_id: String,
    /// Publication year.
    pub year: i32,
    /// Publication month.
    pub month: u32,
    /// Page the chunk came from.
    pub page: u32,
    /// Pointer back to the original artifact.
    pub source_locator: String,
    /// Leading text of the chunk.
    pub snippet: String,
}

/// Answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    /// Trimmed query text.
    pub query: String,
    /// Mode that served the request.
    pub mode: QueryMode,
    /// Modes the backend rejected before `mode` succeeded.
    pub degraded_from: Vec<QueryMode>,
    /// Total matches independent of `top_k`, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    /// Ranked results.
    pub results: Vec<RankedResult>,
}

/// Embeds queries and walks the fallback ladder against the search backend.
#[derive(Clone)]
pub struct QueryEngine {
    embedder: Embedder,
    backend: Arc<dyn SearchBackend>,
    default_top_k: usize,
    max_top_k: usize,
}

impl QueryEngine {
    /// Build an engine; `default_top_k` and `max_top_k` are clamped to at least 1.
    pub fn new(
        embedder: Embedder,
        backend: Arc<dyn SearchBackend>,
        default_top_k: usize,
        max_top_k: usize,
    ) -> Self {
        let max_top_k = max_top_k.max(1);
        Self {
            embedder,
            backend,
            default_top_k: default_top_k.clamp(1, max_top_k),
            max_top_k,
        }
    }

    /// Effective result count for a requested `top_k`.
    pub fn resolve_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k)
    }

    /// Answer `query_text`, degrading through [`QueryMode::LADDER`] on rejections.
    pub async fn search(
        &self,
        query_text: &str,
        top_k: Option<usize>,
        filters: &SearchFilters,
    ) -> Result<SearchResponse, QueryError> {
        let text = query_text.trim();
        if text.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let top = self.resolve_top_k(top_k);
        let vector = self.embedder.embed_one(text).await?;
        let filters = Some(filters).filter(|filters| !filters.is_empty());

        let mut degraded_from = Vec::new();
        let mut last_rejection = None;
        for mode in QueryMode::LADDER {
            let Some(request) = mode.request(text, &vector, top, filters) else {
                tracing::debug!(mode = mode.as_str(), "Skipping mode; no filters to drop");
                continue;
            };

            match self.backend.query(&request).await {
                Ok(response) => {
                    tracing::info!(
                        mode = mode.as_str(),
                        degraded = !degraded_from.is_empty(),
                        hits = response.hits.len(),
                        total = ?response.total_count,
                        "Query served"
                    );
                    return Ok(SearchResponse {
                        query: text.to_string(),
                        mode,
                        degraded_from,
                        total_count: response.total_count,
                        results: rank(response.hits),
                    });
                }
                Err(error) if error.is_rejection() => {
                    tracing::warn!(mode = mode.as_str(), error = %error, "Query mode rejected; falling back");
                    degraded_from.push(mode);
                    last_rejection = Some(error);
                }
                Err(error) => return Err(error.into()),
            }
        }

        tracing::error!(attempted = ?degraded_from, "Every query mode was rejected");
        Err(QueryError::AllModesRejected {
            attempted: degraded_from,
            last: last_rejection,
        })
    }
}

fn rank(hits: Vec<SearchHit>) -> Vec<RankedResult> {
    hits.into_iter()
        .enumerate()
        .map(|(index, hit)| RankedResult {
            rank: index + 1,
            score: hit.score,
            reranker_score: hit.reranker_score,
            snippet: snippet(&hit.chunk.text),
            chunk_id: hit.chunk.chunk_id,
            document_id: hit.chunk.document_id,
            year: hit.chunk.year,
            month: hit.chunk.month,
            page: hit.chunk.page_start,
            source_locator: hit.chunk.source_locator,
        })
        .collect()
}

/// First [`SNIPPET_CHARS`] characters of `text`, with [`TRUNCATION_MARKER`] when cut.
pub fn snippet(text: &str) -> String {
    let mut characters = text.chars();
    let head: String = characters.by_ref().take(SNIPPET_CHARS).collect();
    if characters.next().is_some() {
        format!("{head}{TRUNCATION_MARKER}")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingBackend, HashingBackend};
    use crate::retry::RetryPolicy;
    use crate::search::{IndexDocument, InMemorySearchBackend, StoredChunk};
    use async_trait::async_trait;

    fn embedder() -> Embedder {
        Embedder::new(Arc::new(HashingBackend::new(4)), 16, RetryPolicy::default())
    }

    async fn seeded(backend: InMemorySearchBackend) -> Arc<InMemorySearchBackend> {
        let backend = Arc::new(backend);
        let documents: Vec<IndexDocument> = [(1923, 4, "Harbour strike ends"), (1924, 1, "Cattle fair")]
            .into_iter()
            .enumerate()
            .map(|(index, (year, month, text))| IndexDocument {
                fields: StoredChunk {
                    chunk_id: format!("doc{index}_p1_o0"),
                    document_id: format!("doc{index}"),
                    year,
                    month,
                    page_start: 1,
                    page_end: 1,
                    text: text.into(),
                    source_locator: format!("file:///data/doc{index}.json"),
                },
                embedding: vec![0.5; 4],
            })
            .collect();
        backend.upload(&documents).await.expect("seed");
        backend
    }

    fn year_filter() -> SearchFilters {
        SearchFilters {
            year: Some(1923),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn semantic_mode_serves_when_supported() {
        let backend = seeded(InMemorySearchBackend::new()).await;
        let engine = QueryEngine::new(embedder(), backend.clone(), 5, 50);

        let response = engine
            .search("harbour", None, &year_filter())
            .await
            .expect("search");

        assert_eq!(response.mode, QueryMode::Semantic);
        assert!(response.degraded_from.is_empty());
        assert_eq!(response.results.len(), 1);
        let first = &response.results[0];
        assert_eq!(first.rank, 1);
        assert_eq!(first.document_id, "doc0");
        assert_eq!(first.page, 1);
        assert!(first.reranker_score.is_some());
        assert_eq!(response.total_count, Some(1));
        assert_eq!(backend.queries().await.len(), 1);
    }

    #[tokio::test]
    async fn semantic_rejection_falls_back_to_vector_keyword() {
        let backend = seeded(InMemorySearchBackend::new().rejecting_semantic()).await;
        let engine = QueryEngine::new(embedder(), backend.clone(), 5, 50);

        let response = engine
            .search("harbour", Some(3), &year_filter())
            .await
            .expect("search");

        assert_eq!(response.mode, QueryMode::VectorKeyword);
        assert_eq!(response.degraded_from, vec![QueryMode::Semantic]);
        let queries = backend.queries().await;
        assert_eq!(queries.len(), 2);
        assert!(queries[0].semantic);
        assert!(!queries[1].semantic);
        assert_eq!(queries[1].filters, Some(year_filter()));
        assert_eq!(queries[1].top, 3);
    }

    #[tokio::test]
    async fn filter_rejection_retries_without_filters() {
        let backend = seeded(
            InMemorySearchBackend::new()
                .rejecting_semantic()
                .rejecting_filters(),
        )
        .await;
        let engine = QueryEngine::new(embedder(), backend.clone(), 5, 50);

        let response = engine
            .search("harbour", None, &year_filter())
            .await
            .expect("search");

        assert_eq!(response.mode, QueryMode::VectorKeywordUnfiltered);
        assert_eq!(
            response.degraded_from,
            vec![QueryMode::Semantic, QueryMode::VectorKeyword]
        );
        let queries = backend.queries().await;
        assert_eq!(queries.len(), 3);
        assert!(queries[2].filters.is_none());
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn unfiltered_mode_is_skipped_without_filters() {
        let backend = seeded(InMemorySearchBackend::new().rejecting_semantic()).await;
        let engine = QueryEngine::new(embedder(), backend.clone(), 5, 50);

        let response = engine
            .search("cattle", None, &SearchFilters::default())
            .await
            .expect("search");
        assert_eq!(response.mode, QueryMode::VectorKeyword);
        assert_eq!(backend.queries().await.len(), 2);
    }

    /// Backend whose every query fails with the same error.
    struct FailingBackend(fn() -> SearchBackendError);

    #[async_trait]
    impl SearchBackend for FailingBackend {
        async fn fetch_schema(&self) -> Result<Option<crate::search::IndexSchema>, SearchBackendError> {
            Ok(None)
        }
        async fn create_schema(
            &self,
            _schema: &crate::search::IndexSchema,
        ) -> Result<(), SearchBackendError> {
            Ok(())
        }
        async fn upload(&self, _documents: &[IndexDocument]) -> Result<usize, SearchBackendError> {
            Ok(0)
        }
        async fn delete(&self, _keys: &[String]) -> Result<usize, SearchBackendError> {
            Ok(0)
        }
        async fn query(
            &self,
            _request: &QueryRequest,
        ) -> Result<crate::search::QueryResponse, SearchBackendError> {
            Err((self.0)())
        }
        async fn document_count(&self) -> Result<u64, SearchBackendError> {
            Ok(0)
        }
    }

    fn rejection() -> SearchBackendError {
        SearchBackendError::Rejected {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: "unsupported".into(),
        }
    }

    #[tokio::test]
    async fn unavailability_is_not_a_fallback_trigger() {
        let backend = FailingBackend(|| SearchBackendError::Unavailable("connection refused".into()));
        let engine = QueryEngine::new(embedder(), Arc::new(backend), 5, 50);
        let error = engine
            .search("harbour", None, &year_filter())
            .await
            .expect_err("unavailable");
        assert!(matches!(error, QueryError::Backend(SearchBackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn rejection_at_every_mode_is_terminal() {
        let engine = QueryEngine::new(embedder(), Arc::new(FailingBackend(rejection)), 5, 50);

        let error = engine
            .search("harbour", None, &year_filter())
            .await
            .expect_err("all rejected");
        assert!(matches!(
            error,
            QueryError::AllModesRejected { ref attempted, last: Some(_) } if attempted.len() == 3
        ));

        let error = engine
            .search("harbour", None, &SearchFilters::default())
            .await
            .expect_err("all rejected");
        assert!(matches!(
            error,
            QueryError::AllModesRejected { ref attempted, .. }
                if attempted == &vec![QueryMode::Semantic, QueryMode::VectorKeyword]
        ));
    }

    #[tokio::test]
    async fn embedding_failure_is_a_hard_error() {
        struct Broken;

        #[async_trait]
        impl EmbeddingBackend for Broken {
            async fn generate_embeddings(
                &self,
                _texts: &[String],
            ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Err(EmbeddingError::Rejected {
                    status: 401,
                    body: "bad key".into(),
                })
            }
        }

        let backend = Arc::new(InMemorySearchBackend::new());
        let engine = QueryEngine::new(
            Embedder::new(Arc::new(Broken), 16, RetryPolicy::default()),
            backend.clone(),
            5,
            50,
        );
        let error = engine
            .search("harbour", None, &SearchFilters::default())
            .await
            .expect_err("embedding failure");
        assert!(matches!(error, QueryError::Embedding(_)));
        assert!(backend.queries().await.is_empty());
    }

    #[tokio::test]
    async fn blank_query_is_refused() {
        let engine = QueryEngine::new(embedder(), Arc::new(InMemorySearchBackend::new()), 5, 50);
        assert!(matches!(
            engine.search("   ", None, &SearchFilters::default()).await,
            Err(QueryError::EmptyQuery)
        ));
    }

    #[test]
    fn top_k_defaults_and_clamps() {
        let engine = QueryEngine::new(embedder(), Arc::new(InMemorySearchBackend::new()), 5, 50);
        assert_eq!(engine.resolve_top_k(None), 5);
        assert_eq!(engine.resolve_top_k(Some(0)), 1);
        assert_eq!(engine.resolve_top_k(Some(500)), 50);
    }

    #[test]
    fn snippet_truncates_with_marker() {
        let long = "ä".repeat(300);
        let cut = snippet(&long);
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + TRUNCATION_MARKER.len());
        assert!(cut.ends_with(TRUNCATION_MARKER));

        let exact = "b".repeat(SNIPPET_CHARS);
        assert_eq!(snippet(&exact), exact);
    }
}
