//! Object storage collaborator used by the batch runner.
//!
//! Keys are `/`-separated relative names (`extracted-json/1923-04-gazette.json`). The
//! filesystem store maps them under a root directory; the memory store keeps them in a map.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by blob stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No blob exists under the key.
    #[error("Blob not found: {0}")]
    NotFound(String),
    /// The key escapes the store or is empty.
    #[error("Invalid blob key: {0}")]
    InvalidKey(String),
    /// Underlying I/O failed.
    #[error("I/O error for blob {key}: {source}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Minimal blob storage interface.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Full contents of a blob.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace a blob.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Whether a blob exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Human-meaningful pointer to the blob, stored alongside indexed chunks.
    fn locator(&self, key: &str) -> String;
}
