//! HTTP surface for the periodical search index.
//!
//! The router exposes a small set of endpoints:
//!
//! - `GET /` – Liveness message.
//! - `POST /search` – Hybrid search with optional `year`, `month` and `document_id` filters.
//!   Capability rejections from the search backend are absorbed by the fallback ladder and
//!   reported through `mode` / `degraded_from`, never as errors.
//! - `GET /debug` – Document count, year/month facets and one sample record.
//! - `GET /commands` – Machine-readable command catalog.

use crate::index::{IndexError, IndexStats};
use crate::query::{QueryError, SearchApi, SearchRequest, SearchResponse};
use crate::search::{SearchBackendError, SearchFilters};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Build the HTTP router exposing the search API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: SearchApi + 'static,
{
    Router::new()
        .route("/", get(health))
        .route("/search", post(search::<S>))
        .route("/debug", get(debug::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "message": "service up and running" }))
}

/// Request body for `POST /search`.
#[derive(Deserialize)]
struct SearchBody {
    /// Natural-language query.
    query: String,
    /// Result count (defaults to `SEARCH_DEFAULT_TOP_K`, clamped to `SEARCH_MAX_TOP_K`).
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    document_id: Option<String>,
}

async fn search<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: SearchApi,
{
    let SearchBody {
        query,
        top_k,
        year,
        month,
        document_id,
    } = body;
    let request = SearchRequest {
        query,
        top_k,
        filters: SearchFilters {
            year,
            month,
            document_id,
        },
    };
    let response = service.search(request).await?;
    tracing::info!(
        mode = response.mode.as_str(),
        degraded = response.degraded_from.len(),
        results = response.results.len(),
        "Search request completed"
    );
    Ok(Json(response))
}

async fn debug<S>(State(service): State<Arc<S>>) -> Result<Json<IndexStats>, AppError>
where
    S: SearchApi,
{
    Ok(Json(service.debug().await?))
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "search",
                method: "POST",
                path: "/search",
                description: "Hybrid vector and keyword search over periodical chunks. Response carries the serving mode, any degraded modes, and ranked snippets.",
                request_example: Some(json!({
                    "query": "harbour strike",
                    "top_k": 5,
                    "year": 1923,
                    "month": 4
                })),
            },
            CommandDescriptor {
                name: "debug",
                method: "GET",
                path: "/debug",
                description: "Return the document count, year and month facets, and a sample record.",
                request_example: None,
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/",
                description: "Liveness check.",
                request_example: None,
            },
        ],
    })
}

struct AppError(QueryError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            QueryError::EmptyQuery => StatusCode::BAD_REQUEST,
            QueryError::Backend(err) | QueryError::Index(IndexError::Backend(err)) => {
                backend_status(err)
            }
            QueryError::Embedding(_)
            | QueryError::AllModesRejected { .. }
            | QueryError::Index(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

fn backend_status(err: &SearchBackendError) -> StatusCode {
    if err.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_GATEWAY
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(inner: QueryError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::embedding::EmbeddingError;
    use crate::index::IndexStats;
    use crate::query::{QueryError, QueryMode, SearchApi, SearchRequest, SearchResponse};
    use crate::search::SearchBackendError;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[tokio::test]
    async fn commands_catalog_exposes_search_endpoint() {
        let commands = get_commands().await.0.commands;
        let search = commands
            .iter()
            .find(|cmd| cmd.name == "search")
            .expect("search command present");

        assert_eq!(search.method, "POST");
        assert_eq!(search.path, "/search");
        assert!(commands.iter().any(|cmd| cmd.path == "/debug"));
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let app = create_router(Arc::new(StubSearchService::ok()));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "service up and running");
    }

    #[tokio::test]
    async fn search_route_forwards_query_and_filters() {
        let service = Arc::new(StubSearchService::ok());
        let app = create_router(service.clone());

        let response = app
            .oneshot(post_search(json!({
                "query": "harbour strike",
                "top_k": 3,
                "year": 1923,
                "month": 4
            })))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["mode"], "vector_keyword");
        assert_eq!(body["degraded_from"], json!(["semantic"]));

        let calls = service.calls.lock().await.clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query, "harbour strike");
        assert_eq!(calls[0].top_k, Some(3));
        assert_eq!(calls[0].filters.year, Some(1923));
        assert_eq!(calls[0].filters.month, Some(4));
        assert_eq!(calls[0].filters.document_id, None);
    }

    #[tokio::test]
    async fn query_errors_map_to_status_codes() {
        fn empty() -> QueryError {
            QueryError::EmptyQuery
        }
        fn embedding() -> QueryError {
            QueryError::Embedding(EmbeddingError::RateLimited("slow down".into()))
        }
        fn unavailable() -> QueryError {
            QueryError::Backend(SearchBackendError::Unavailable("timed out".into()))
        }
        fn all_rejected() -> QueryError {
            QueryError::AllModesRejected {
                attempted: QueryMode::LADDER.to_vec(),
                last: None,
            }
        }
        type MakeError = fn() -> QueryError;
        let cases = [
            (empty as MakeError, StatusCode::BAD_REQUEST),
            (embedding as MakeError, StatusCode::BAD_GATEWAY),
            (unavailable as MakeError, StatusCode::SERVICE_UNAVAILABLE),
            (all_rejected as MakeError, StatusCode::BAD_GATEWAY),
        ];

        for (error, expected) in cases {
            let app = create_router(Arc::new(StubSearchService::failing(error)));
            let response = app
                .oneshot(post_search(json!({ "query": "x" })))
                .await
                .expect("router response");
            assert_eq!(response.status(), expected);
            assert!(body_json(response).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn debug_route_returns_stats() {
        let app = create_router(Arc::new(StubSearchService::ok()));
        let response = app
            .oneshot(Request::get("/debug").body(Body::empty()).expect("request"))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["document_count"], 7);
    }

    fn post_search(payload: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/search")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    struct StubSearchService {
        calls: Mutex<Vec<SearchRequest>>,
        failure: Option<fn() -> QueryError>,
    }

    impl StubSearchService {
        fn ok() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failure: None,
            }
        }

        fn failing(failure: fn() -> QueryError) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failure: Some(failure),
            }
        }
    }

    #[async_trait]
    impl SearchApi for StubSearchService {
        async fn search(&self, request: SearchRequest) -> Result<SearchResponse, QueryError> {
            let query = request.query.clone();
            self.calls.lock().await.push(request);
            if let Some(failure) = self.failure {
                return Err(failure());
            }
            Ok(SearchResponse {
                query,
                mode: QueryMode::VectorKeyword,
                degraded_from: vec![QueryMode::Semantic],
                total_count: Some(0),
                results: Vec::new(),
            })
        }

        async fn debug(&self) -> Result<IndexStats, QueryError> {
            Ok(IndexStats {
                document_count: 7,
                ..IndexStats::default()
            })
        }
    }
}
