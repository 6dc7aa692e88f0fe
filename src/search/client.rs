//! HTTP client for the Azure AI Search REST API.

use super::filters::build_odata_filter;
use super::schema::{IndexSchema, KEY_FIELD, SEMANTIC_CONFIGURATION, VECTOR_FIELD};
use super::types::{
    FacetCount, IndexDocument, QueryRequest, QueryResponse, SearchBackendError, SearchHit,
    StoredChunk,
};
use super::SearchBackend;
use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

const SELECT_FIELDS: &str =
    "chunk_id,document_id,year,month,page_start,page_end,text,source_locator";

/// REST client bound to one search index.
pub struct AzureSearchClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) index_name: String,
    pub(crate) api_version: String,
}

impl AzureSearchClient {
    /// Construct a client from configuration.
    pub fn from_config(config: &Config) -> Result<Self, SearchBackendError> {
        let client = Client::builder()
            .user_agent("periodex/0.1")
            .timeout(Duration::from_secs(60))
            .build()?;
        let base_url =
            normalize_base_url(&config.search_endpoint).map_err(SearchBackendError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            index = %config.search_index_name,
            has_api_key = %config
                .search_api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized search HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.search_api_key.clone(),
            index_name: config.search_index_name.clone(),
            api_version: config.search_api_version.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self
            .client
            .request(method, url)
            .query(&[("api-version", self.api_version.as_str())]);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response, SearchBackendError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = SearchBackendError::from_status(status, body);
        if error.is_rejection() {
            tracing::debug!(index = %self.index_name, operation, error = %error, "Search request rejected");
        } else {
            tracing::error!(index = %self.index_name, operation, error = %error, "Search request failed");
        }
        Err(error)
    }

    async fn index_actions(
        &self,
        actions: Vec<Value>,
        operation: &str,
    ) -> Result<usize, SearchBackendError> {
        let total = actions.len();
        let response = self
            .request(Method::POST, &format!("indexes/{}/docs/index", self.index_name))
            .json(&json!({ "value": actions }))
            .send()
            .await?;
        let response = self.ensure_success(response, operation).await?;

        let IndexActionResponse { value } = response.json().await?;
        let failures: Vec<&IndexActionResult> = value.iter().filter(|item| !item.status).collect();
        if let Some(first) = failures.first() {
            return Err(SearchBackendError::PartialFailure {
                total,
                failed: failures.len(),
                first_error: format!(
                    "{}: {}",
                    first.key,
                    first.error_message.as_deref().unwrap_or("no error message")
                ),
            });
        }
        Ok(value.len())
    }

    fn query_body(&self, request: &QueryRequest) -> Value {
        let mut body = Map::new();
        body.insert("search".into(), Value::String(request.text.clone()));
        body.insert("top".into(), json!(request.top));
        body.insert("select".into(), Value::String(SELECT_FIELDS.into()));
        if request.include_total_count {
            body.insert("count".into(), Value::Bool(true));
        }
        if let Some(filter) = request.filters.as_ref().and_then(build_odata_filter) {
            body.insert("filter".into(), Value::String(filter));
        }
        if request.semantic {
            body.insert("queryType".into(), Value::String("semantic".into()));
            body.insert(
                "semanticConfiguration".into(),
                Value::String(SEMANTIC_CONFIGURATION.into()),
            );
        }
        if let Some(vector) = &request.vector {
            body.insert(
                "vectorQueries".into(),
                json!([{
                    "kind": "vector",
                    "vector": vector,
                    "fields": VECTOR_FIELD,
                    "k": request.top,
                }]),
            );
        }
        if !request.facets.is_empty() {
            body.insert("facets".into(), json!(request.facets));
        }
        Value::Object(body)
    }
}

#[async_trait]
impl SearchBackend for AzureSearchClient {
    async fn fetch_schema(&self) -> Result<Option<IndexSchema>, SearchBackendError> {
        let response = self
            .request(Method::GET, &format!("indexes/{}", self.index_name))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.ensure_success(response, "fetch_schema").await?;
        Ok(Some(response.json().await?))
    }

    async fn create_schema(&self, schema: &IndexSchema) -> Result<(), SearchBackendError> {
        let response = self
            .request(Method::POST, "indexes")
            .json(schema)
            .send()
            .await?;
        self.ensure_success(response, "create_schema").await?;
        tracing::info!(index = %schema.name, dimension = ?schema.vector_dimension(), "Index created");
        Ok(())
    }

    async fn upload(&self, documents: &[IndexDocument]) -> Result<usize, SearchBackendError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let actions = documents
            .iter()
            .map(|document| {
                let mut action = serde_json::to_value(document)
                    .map_err(|err| SearchBackendError::InvalidResponse(err.to_string()))?;
                if let Value::Object(map) = &mut action {
                    map.insert(
                        "@search.action".into(),
                        Value::String("mergeOrUpload".into()),
                    );
                }
                Ok(action)
            })
            .collect::<Result<Vec<_>, SearchBackendError>>()?;

        let acknowledged = self.index_actions(actions, "upload").await?;
        tracing::debug!(index = %self.index_name, documents = acknowledged, "Documents merged");
        Ok(acknowledged)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, SearchBackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let actions = keys
            .iter()
            .map(|key| json!({ "@search.action": "delete", KEY_FIELD: key }))
            .collect();
        self.index_actions(actions, "delete").await
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, SearchBackendError> {
        let response = self
            .request(
                Method::POST,
                &format!("indexes/{}/docs/search", self.index_name),
            )
            .json(&self.query_body(request))
            .send()
            .await?;
        let response = self.ensure_success(response, "query").await?;

        let payload: RawQueryResponse = response.json().await?;
        Ok(QueryResponse {
            hits: payload
                .value
                .into_iter()
                .map(|hit| SearchHit {
                    score: hit.score,
                    reranker_score: hit.reranker_score,
                    chunk: hit.chunk,
                })
                .collect(),
            total_count: payload.count,
            facets: payload.facets,
        })
    }

    async fn document_count(&self) -> Result<u64, SearchBackendError> {
        let response = self
            .request(
                Method::GET,
                &format!("indexes/{}/docs/$count", self.index_name),
            )
            .send()
            .await?;
        let response = self.ensure_success(response, "document_count").await?;
        let body = response.text().await?;
        body.trim_start_matches('\u{feff}')
            .trim()
            .parse()
            .map_err(|_| SearchBackendError::InvalidResponse(format!("count body: {body}")))
    }
}

#[derive(Deserialize)]
struct RawQueryResponse {
    #[serde(rename = "@odata.count", default)]
    count: Option<u64>,
    #[serde(rename = "@search.facets", default)]
    facets: BTreeMap<String, Vec<FacetCount>>,
    #[serde(default)]
    value: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "@search.score", default)]
    score: f64,
    #[serde(rename = "@search.rerankerScore", default)]
    reranker_score: Option<f64>,
    #[serde(flatten)]
    chunk: StoredChunk,
}

#[derive(Deserialize)]
struct IndexActionResponse {
    #[serde(default)]
    value: Vec<IndexActionResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexActionResult {
    key: String,
    status: bool,
    #[serde(default)]
    error_message: Option<String>,
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
