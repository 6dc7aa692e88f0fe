//! In-process search backend for tests and offline runs.
//!
//! Scores documents with cosine similarity plus a term-overlap bonus. It can be told to
//! refuse semantic ranking or filters, the same way a search tier lacking those features
//! answers with HTTP 400, and records every query it serves.

use super::SearchBackend;
use super::schema::IndexSchema;
use super::types::{
    FacetCount, IndexDocument, QueryRequest, QueryResponse, SearchBackendError, SearchHit,
    StoredChunk,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Search backend holding documents in memory.
#[derive(Default)]
pub struct InMemorySearchBackend {
    state: Mutex<MemoryState>,
    reject_semantic: AtomicBool,
    reject_filters: AtomicBool,
    unavailable_uploads: AtomicUsize,
}

#[derive(Default)]
struct MemoryState {
    schema: Option<IndexSchema>,
    documents: BTreeMap<String, IndexDocument>,
    queries: Vec<QueryRequest>,
    upload_batches: Vec<usize>,
}

impl InMemorySearchBackend {
    /// Empty backend with every feature enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse requests that ask for semantic ranking.
    pub fn rejecting_semantic(self) -> Self {
        self.reject_semantic.store(true, Ordering::SeqCst);
        self
    }

    /// Refuse requests that carry filters.
    pub fn rejecting_filters(self) -> Self {
        self.reject_filters.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` uploads as if the service were unreachable.
    pub fn fail_next_uploads(&self, count: usize) {
        self.unavailable_uploads.store(count, Ordering::SeqCst);
    }

    /// Queries served or refused so far, in arrival order.
    pub async fn queries(&self) -> Vec<QueryRequest> {
        self.state.lock().await.queries.clone()
    }

    /// Sizes of the upload batches accepted so far.
    pub async fn upload_batches(&self) -> Vec<usize> {
        self.state.lock().await.upload_batches.clone()
    }

    /// Stored document for `chunk_id`.
    pub async fn document(&self, chunk_id: &str) -> Option<IndexDocument> {
        self.state.lock().await.documents.get(chunk_id).cloned()
    }

    /// Current schema, if one was created.
    pub async fn schema(&self) -> Option<IndexSchema> {
        self.state.lock().await.schema.clone()
    }

    fn rejected(body: &str) -> SearchBackendError {
        SearchBackendError::Rejected {
            status: StatusCode::BAD_REQUEST,
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    async fn fetch_schema(&self) -> Result<Option<IndexSchema>, SearchBackendError> {
        Ok(self.state.lock().await.schema.clone())
    }

    async fn create_schema(&self, schema: &IndexSchema) -> Result<(), SearchBackendError> {
        let mut state = self.state.lock().await;
        if state.schema.is_some() {
            return Err(SearchBackendError::Conflict(schema.name.clone()));
        }
        state.schema = Some(schema.clone());
        Ok(())
    }

    async fn upload(&self, documents: &[IndexDocument]) -> Result<usize, SearchBackendError> {
        let pending = self.unavailable_uploads.load(Ordering::SeqCst);
        if pending > 0 {
            self.unavailable_uploads.store(pending - 1, Ordering::SeqCst);
            return Err(SearchBackendError::Unavailable("simulated outage".into()));
        }

        let mut state = self.state.lock().await;
        if let Some(dimension) = state.schema.as_ref().and_then(IndexSchema::vector_dimension)
            && let Some(bad) = documents
                .iter()
                .find(|document| document.embedding.len() != dimension)
        {
            return Err(Self::rejected(&format!(
                "vector for {} has {} dimensions, index expects {dimension}",
                bad.fields.chunk_id,
                bad.embedding.len()
            )));
        }
        for document in documents {
            state
                .documents
                .insert(document.fields.chunk_id.clone(), document.clone());
        }
        state.upload_batches.push(documents.len());
        Ok(documents.len())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, SearchBackendError> {
        let mut state = self.state.lock().await;
        for key in keys {
            state.documents.remove(key);
        }
        Ok(keys.len())
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, SearchBackendError> {
        let mut state = self.state.lock().await;
        state.queries.push(request.clone());

        if request.semantic && self.reject_semantic.load(Ordering::SeqCst) {
            return Err(Self::rejected("semantic ranking is not enabled for this service"));
        }
        let filters = request.filters.as_ref().filter(|filters| !filters.is_empty());
        if filters.is_some() && self.reject_filters.load(Ordering::SeqCst) {
            return Err(Self::rejected("invalid $filter expression"));
        }

        let terms = query_terms(&request.text);
        let matching: Vec<&IndexDocument> = state
            .documents
            .values()
            .filter(|document| filters.is_none_or(|filters| filters.matches(&document.fields)))
            .collect();

        let mut hits: Vec<SearchHit> = matching
            .iter()
            .filter_map(|document| {
                let keyword = term_overlap(&terms, &document.fields.text);
                let score = match &request.vector {
                    Some(vector) => cosine(vector, &document.embedding) + keyword,
                    None if terms.is_empty() || keyword > 0.0 => keyword,
                    None => return None,
                };
                Some(SearchHit {
                    score,
                    reranker_score: request.semantic.then_some(score),
                    chunk: document.fields.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        let total = hits.len() as u64;
        hits.truncate(request.top);

        let facets = request
            .facets
            .iter()
            .map(|field| (field.clone(), facet(field, &matching)))
            .collect();

        Ok(QueryResponse {
            hits,
            total_count: request.include_total_count.then_some(total),
            facets,
        })
    }

    async fn document_count(&self) -> Result<u64, SearchBackendError> {
        Ok(self.state.lock().await.documents.len() as u64)
    }
}

fn query_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn term_overlap(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let found = terms
        .iter()
        .filter(|term| haystack.contains(term.as_str()))
        .count();
    found as f64 / terms.len() as f64
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn facet(field: &str, documents: &[&IndexDocument]) -> Vec<FacetCount> {
    let mut buckets: BTreeMap<String, (Value, u64)> = BTreeMap::new();
    for document in documents {
        let value = facet_value(field, &document.fields);
        if value.is_null() {
            continue;
        }
        buckets
            .entry(value.to_string())
            .or_insert_with(|| (value.clone(), 0))
            .1 += 1;
    }
    let mut counts: Vec<FacetCount> = buckets
        .into_values()
        .map(|(value, count)| FacetCount { value, count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

fn facet_value(field: &str, chunk: &StoredChunk) -> Value {
    match field {
        "year" => Value::from(chunk.year),
        "month" => Value::from(chunk.month),
        "document_id" => Value::from(chunk.document_id.clone()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchFilters, build_odata_filter};

    fn document(chunk_id: &str, year: i32, text: &str, embedding: Vec<f32>) -> IndexDocument {
        IndexDocument {
            fields: StoredChunk {
                chunk_id: chunk_id.into(),
                document_id: format!("{year}-01-gazette"),
                year,
                month: 1,
                page_start: 1,
                page_end: 1,
                text: text.into(),
                source_locator: String::new(),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn ranks_by_vector_and_keywords_within_filters() {
        let backend = InMemorySearchBackend::new();
        backend
            .upload(&[
                document("a", 1923, "harbour strike", vec![1.0, 0.0]),
                document("b", 1923, "cattle prices", vec![0.0, 1.0]),
                document("c", 1924, "harbour strike", vec![1.0, 0.0]),
            ])
            .await
            .expect("upload");

        let response = backend
            .query(&QueryRequest {
                text: "harbour".into(),
                vector: Some(vec![1.0, 0.0]),
                top: 5,
                filters: Some(SearchFilters {
                    year: Some(1923),
                    ..Default::default()
                }),
                semantic: false,
                include_total_count: true,
                facets: vec!["year".into()],
            })
            .await
            .expect("query");

        let ids: Vec<_> = response.hits.iter().map(|hit| hit.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(response.total_count, Some(2));
        assert_eq!(response.facets["year"][0].count, 2);
    }

    #[tokio::test]
    async fn refuses_disabled_features() {
        let backend = InMemorySearchBackend::new()
            .rejecting_semantic()
            .rejecting_filters();

        let mut request = QueryRequest::match_all(3);
        request.semantic = true;
        assert!(backend.query(&request).await.expect_err("semantic").is_rejection());

        request.semantic = false;
        request.filters = Some(SearchFilters {
            month: Some(2),
            ..Default::default()
        });
        assert!(backend.query(&request).await.expect_err("filter").is_rejection());

        request.filters = None;
        backend.query(&request).await.expect("plain query");
        assert_eq!(backend.queries().await.len(), 3);
    }

    #[tokio::test]
    async fn document_id_filter_ignores_surrounding_whitespace() {
        let backend = InMemorySearchBackend::new().rejecting_filters();
        backend
            .upload(&[
                document("a", 1923, "harbour strike", vec![1.0, 0.0]),
                document("b", 1924, "cattle prices", vec![0.0, 1.0]),
            ])
            .await
            .expect("upload");

        let blank = SearchFilters {
            document_id: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank.is_empty());
        assert_eq!(build_odata_filter(&blank), None);
        let mut request = QueryRequest::match_all(5);
        request.filters = Some(blank);
        let response = backend.query(&request).await.expect("blank id is no filter");
        assert_eq!(response.hits.len(), 2);

        let padded = SearchFilters {
            document_id: Some(" 1924-01-gazette ".into()),
            ..Default::default()
        };
        assert!(!padded.matches(&document("a", 1923, "", Vec::new()).fields));
        assert!(padded.matches(&document("b", 1924, "", Vec::new()).fields));
        assert_eq!(
            build_odata_filter(&padded).as_deref(),
            Some("document_id eq '1924-01-gazette'")
        );
    }

    #[tokio::test]
    async fn second_schema_create_conflicts() {
        let backend = InMemorySearchBackend::new();
        let schema = IndexSchema::for_chunks("chunks", 2);
        backend.create_schema(&schema).await.expect("create");
        assert!(matches!(
            backend.create_schema(&schema).await,
            Err(SearchBackendError::Conflict(_))
        ));
    }
}
