use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use httpmock::{
    Method::{GET, POST},
    MockServer,
};
use periodex::config::{Config, EmbeddingFailurePolicy, EmbeddingProvider};
use periodex::embedding::{Embedder, EmbeddingBackend, EmbeddingError, HashingBackend};
use periodex::index::IndexManager;
use periodex::ocr::{DocumentMeta, NormalizeError};
use periodex::processing::{
    BatchOptions, BatchRunner, BatchSettings, DocumentOutcome, Pipeline, PipelineError,
    PipelineSettings,
};
use periodex::query::{QueryEngine, QueryMode};
use periodex::retry::RetryPolicy;
use periodex::search::{AzureSearchClient, InMemorySearchBackend, SearchBackend, SearchFilters};
use periodex::storage::{BlobStore, FsBlobStore};
use serde_json::{Value, json};

const DIMENSION: usize = 4;

/// Returns `[n, 1, 0, 0]` for the n-th call so successive embeddings of the same text differ.
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingBackend for CountingBackend {
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(texts
            .iter()
            .map(|_| vec![call as f32, 1.0, 0.0, 0.0])
            .collect())
    }
}

fn pipeline(embedding: Arc<dyn EmbeddingBackend>, search: Arc<dyn SearchBackend>) -> Pipeline {
    Pipeline::new(
        Embedder::new(embedding, 16, RetryPolicy::new(0, 2.0)),
        IndexManager::new(search, "periodical-chunks", 1000, RetryPolicy::new(0, 2.0)),
        PipelineSettings {
            window_size: 900,
            overlap: 120,
            failure_policy: EmbeddingFailurePolicy::Abort,
            embedding_dimension: DIMENSION,
        },
    )
}

fn meta(document_id: &str, year: i32, month: u32) -> DocumentMeta {
    DocumentMeta {
        document_id: document_id.into(),
        year,
        month,
        source_locator: format!("scans/{document_id}.pdf"),
    }
}

fn extracted(text: &str) -> Value {
    json!({ "pages": [{ "page_number": 1, "content": text }] })
}

async fn seeded_index(search: Arc<InMemorySearchBackend>) {
    let pipeline = pipeline(Arc::new(HashingBackend::new(DIMENSION)), search);
    for (id, year, month, text) in [
        ("1923-04-gazette", 1923, 4, "Harbour strike ends after three weeks."),
        ("1924-07-gazette", 1924, 7, "Harbour dredging contract awarded."),
    ] {
        pipeline
            .process_document(&extracted(text), &meta(id, year, month))
            .await
            .expect("seed document");
    }
}

fn engine(search: Arc<InMemorySearchBackend>) -> QueryEngine {
    QueryEngine::new(
        Embedder::new(Arc::new(HashingBackend::new(DIMENSION)), 16, RetryPolicy::default()),
        search,
        5,
        50,
    )
}

#[tokio::test]
async fn reingesting_a_document_replaces_its_chunks() {
    let search = Arc::new(InMemorySearchBackend::new());
    let pipeline = pipeline(Arc::new(CountingBackend::default()), search.clone());
    let document = extracted("Harbour strike ends.");
    let meta = meta("1923-04-gazette", 1923, 4);

    pipeline.process_document(&document, &meta).await.expect("first ingest");
    pipeline.process_document(&document, &meta).await.expect("second ingest");

    assert_eq!(search.document_count().await.expect("count"), 1);
    let stored = search
        .document("1923-04-gazette_p1_o0")
        .await
        .expect("chunk stored");
    assert_eq!(stored.embedding, vec![2.0, 1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn semantic_rejection_falls_back_to_vector_keyword() {
    let search = Arc::new(InMemorySearchBackend::new().rejecting_semantic());
    seeded_index(search.clone()).await;

    let response = engine(search.clone())
        .search("harbour strike", Some(2), &SearchFilters::default())
        .await
        .expect("search");

    assert_eq!(response.mode, QueryMode::VectorKeyword);
    assert_eq!(response.degraded_from, vec![QueryMode::Semantic]);
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].rank, 1);
    assert_eq!(search.queries().await.len(), 2);
}

#[tokio::test]
async fn filter_rejection_retries_without_filters() {
    let search = Arc::new(InMemorySearchBackend::new().rejecting_filters());
    seeded_index(search.clone()).await;
    let filters = SearchFilters {
        year: Some(1923),
        ..SearchFilters::default()
    };

    let response = engine(search.clone())
        .search("harbour", None, &filters)
        .await
        .expect("search");

    assert_eq!(response.mode, QueryMode::VectorKeywordUnfiltered);
    assert_eq!(
        response.degraded_from,
        vec![QueryMode::Semantic, QueryMode::VectorKeyword]
    );
    let queries = search.queries().await;
    assert_eq!(queries.len(), 3);
    assert!(queries[2].filters.is_none());
}

#[tokio::test]
async fn filters_narrow_results_when_supported() {
    let search = Arc::new(InMemorySearchBackend::new());
    seeded_index(search.clone()).await;
    let filters = SearchFilters {
        year: Some(1924),
        month: Some(7),
        document_id: None,
    };

    let response = engine(search)
        .search("harbour", None, &filters)
        .await
        .expect("search");

    assert_eq!(response.mode, QueryMode::Semantic);
    assert!(response.degraded_from.is_empty());
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].document_id, "1924-07-gazette");
    assert_eq!(response.results[0].source_locator, "scans/1924-07-gazette.pdf");
}

#[tokio::test]
async fn unsupported_ocr_document_touches_nothing_downstream() {
    let search = Arc::new(InMemorySearchBackend::new());
    let embedding = Arc::new(CountingBackend::default());
    let pipeline = pipeline(embedding.clone(), search.clone());

    let error = pipeline
        .process_document(&json!({ "status": "running" }), &meta("odd", 1923, 4))
        .await
        .expect_err("unsupported format");

    assert!(matches!(
        error,
        PipelineError::Normalize(NormalizeError::UnsupportedFormat(_))
    ));
    assert_eq!(embedding.calls.load(Ordering::SeqCst), 0);
    assert!(search.upload_batches().await.is_empty());
    assert!(search.schema().await.is_none());
    assert_eq!(pipeline.metrics().snapshot().documents_failed, 1);
}

#[tokio::test]
async fn batch_run_over_filesystem_staging_is_incremental() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FsBlobStore::new(dir.path()));
    for (name, text) in [
        ("1923-04-gazette", "Harbour strike ends."),
        ("1923-05-gazette", "Cattle fair opens."),
    ] {
        store
            .write(
                &format!("extracted-json/{name}.json"),
                extracted(text).to_string().as_bytes(),
            )
            .await
            .expect("stage blob");
    }
    let search = Arc::new(InMemorySearchBackend::new());
    let runner = BatchRunner::new(
        pipeline(Arc::new(HashingBackend::new(DIMENSION)), search.clone()),
        store.clone(),
        BatchSettings {
            staging_prefix: "extracted-json/".into(),
            marker_prefix: "processed/".into(),
            reset_flag_key: "function-flags/delete_done.flag".into(),
            max_workers: 2,
        },
    );

    let first = runner.run(BatchOptions::default()).await.expect("first run");
    assert_eq!(first.indexed, 2);
    assert!(first.failed.is_empty());
    assert!(dir
        .path()
        .join("processed/extracted-json/1923-04-gazette.json.json")
        .exists());

    let stored = search
        .document("1923-04-gazette_p1_o0")
        .await
        .expect("indexed chunk");
    assert_eq!((stored.fields.year, stored.fields.month), (1923, 4));
    assert!(stored.fields.source_locator.ends_with("extracted-json/1923-04-gazette.json"));

    let second = runner.run(BatchOptions::default()).await.expect("second run");
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 2);
}

fn http_config(server: &MockServer) -> Config {
    Config {
        search_endpoint: server.base_url(),
        search_api_key: Some("search-key".into()),
        search_index_name: "periodical-chunks".into(),
        search_api_version: "2024-07-01".into(),
        embedding_provider: EmbeddingProvider::AzureOpenAi,
        embedding_endpoint: Some(server.base_url()),
        embedding_api_key: Some("embed-key".into()),
        embedding_model: "text-embedding-3-large".into(),
        embedding_api_version: "2024-06-01".into(),
        embedding_dimension: DIMENSION,
        embedding_batch_size: 16,
        embedding_max_retries: 0,
        embedding_backoff_base: 2.0,
        embedding_failure_policy: EmbeddingFailurePolicy::Abort,
        chunk_window_size: 900,
        chunk_overlap: 120,
        upsert_batch_size: 1000,
        max_workers: 1,
        staging_root: "data".into(),
        staging_prefix: "extracted-json/".into(),
        marker_prefix: "processed/".into(),
        reset_flag_key: "function-flags/delete_done.flag".into(),
        ocr_endpoint: None,
        ocr_api_key: None,
        ocr_model: "prebuilt-read".into(),
        ocr_api_version: "2024-11-30".into(),
        search_default_top_k: 5,
        search_max_top_k: 50,
        server_port: None,
    }
}

#[tokio::test]
async fn ingests_through_rest_adapters() {
    let server = MockServer::start_async().await;
    let embeddings = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/openai/deployments/text-embedding-3-large/embeddings")
                .header("api-key", "embed-key")
                .json_body(json!({ "input": ["Harbour strike ends."] }));
            then.status(200).json_body(json!({
                "data": [{ "index": 0, "embedding": [0.5, 0.5, 0.5, 0.5] }]
            }));
        })
        .await;
    let fetch = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/indexes/periodical-chunks")
                .header("api-key", "search-key");
            then.status(404).body("index not found");
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/indexes")
                .json_body_partial(r#"{ "name": "periodical-chunks" }"#);
            then.status(201).json_body(json!({ "name": "periodical-chunks" }));
        })
        .await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/indexes/periodical-chunks/docs/index")
                .json_body_partial(
                    r#"{ "value": [{ "@search.action": "mergeOrUpload", "chunk_id": "1923-04-gazette_p1_o0", "year": 1923 }] }"#,
                );
            then.status(200).json_body(json!({
                "value": [{ "key": "1923-04-gazette_p1_o0", "status": true, "statusCode": 201 }]
            }));
        })
        .await;

    let config = http_config(&server);
    let backend: Arc<dyn SearchBackend> =
        Arc::new(AzureSearchClient::from_config(&config).expect("search client"));
    let pipeline = Pipeline::new(
        Embedder::from_config(&config).expect("embedder"),
        IndexManager::from_config(backend, &config),
        PipelineSettings::from_config(&config),
    );

    let outcome = pipeline
        .process_document(
            &extracted("Harbour strike ends."),
            &meta("1923-04-gazette", 1923, 4),
        )
        .await
        .expect("ingest");

    let DocumentOutcome::Indexed(indexed) = outcome else {
        panic!("expected an indexed document");
    };
    assert_eq!(indexed.chunks, 1);
    assert_eq!(indexed.acknowledged, 1);
    assert_eq!(indexed.vector_dimension, DIMENSION);
    embeddings.assert_async().await;
    fetch.assert_async().await;
    create.assert_async().await;
    upload.assert_async().await;
}
