//! Search backend integration: the trait the index manager and query engine depend on,
//! the Azure AI Search REST adapter, and an in-memory fake.

pub mod client;
pub mod filters;
pub mod memory;
pub mod schema;
pub mod types;

pub use client::AzureSearchClient;
pub use filters::build_odata_filter;
pub use memory::InMemorySearchBackend;
pub use schema::IndexSchema;
pub use types::{
    FacetCount, IndexDocument, QueryRequest, QueryResponse, SearchBackendError, SearchFilters,
    SearchHit, StoredChunk,
};

use async_trait::async_trait;

/// Operations required from a hybrid lexical and vector search service, bound to one index.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Fetch the index definition, or `None` when the index does not exist.
    async fn fetch_schema(&self) -> Result<Option<IndexSchema>, SearchBackendError>;

    /// Create the index. Fails with [`SearchBackendError::Conflict`] when it already exists.
    async fn create_schema(&self, schema: &IndexSchema) -> Result<(), SearchBackendError>;

    /// Merge-or-upload documents by key, returning the number acknowledged.
    async fn upload(&self, documents: &[IndexDocument]) -> Result<usize, SearchBackendError>;

    /// Delete documents by key, returning the number acknowledged.
    async fn delete(&self, keys: &[String]) -> Result<usize, SearchBackendError>;

    /// Run one query.
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, SearchBackendError>;

    /// Number of documents currently in the index.
    async fn document_count(&self) -> Result<u64, SearchBackendError>;
}
