use super::{QueryEngine, QueryError, SearchResponse};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::{IndexManager, IndexStats};
use crate::search::{AzureSearchClient, SearchBackend, SearchFilters};
use async_trait::async_trait;
use std::sync::Arc;

/// Parameters of one search call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    /// Natural-language query text.
    pub query: String,
    /// Requested result count; defaults and clamping happen downstream.
    pub top_k: Option<usize>,
    /// Optional structured filters.
    pub filters: SearchFilters,
}

/// Operations exposed to the HTTP layer.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Answer a query through the fallback ladder.
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, QueryError>;

    /// Index statistics for diagnostics.
    async fn debug(&self) -> Result<IndexStats, QueryError>;
}

/// Production [`SearchApi`] combining the query engine and the index manager.
pub struct SearchService {
    engine: QueryEngine,
    index: IndexManager,
}

impl SearchService {
    /// Wire a service from existing components.
    pub fn new(engine: QueryEngine, index: IndexManager) -> Self {
        Self { engine, index }
    }

    /// Build the production service from configuration.
    pub fn from_config(config: &Config) -> Result<Self, QueryError> {
        let backend: Arc<dyn SearchBackend> = Arc::new(AzureSearchClient::from_config(config)?);
        let embedder = Embedder::from_config(config)?;
        let engine = QueryEngine::new(
            embedder,
            Arc::clone(&backend),
            config.search_default_top_k,
            config.search_max_top_k,
        );
        Ok(Self::new(engine, IndexManager::from_config(backend, config)))
    }
}

#[async_trait]
impl SearchApi for SearchService {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, QueryError> {
        self.engine
            .search(&request.query, request.top_k, &request.filters)
            .await
    }

    async fn debug(&self) -> Result<IndexStats, QueryError> {
        Ok(self.index.stats().await?)
    }
}
