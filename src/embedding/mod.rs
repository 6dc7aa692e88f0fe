//! Embedding generation: backend abstraction, adapters, and the batching embedder.
//!
//! [`Embedder`] is what the rest of the crate talks to. It splits input into fixed-size
//! batches, submits them one after another, retries rate-limited or unreachable batches with
//! exponential backoff, and returns exactly one vector per input text in input order.

mod azure_openai;
mod hashing;

pub use azure_openai::AzureOpenAiBackend;
pub use hashing::HashingBackend;

use crate::config::{Config, EmbeddingProvider};
use crate::retry::{RetryError, RetryPolicy};
use async_trait::async_trait;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding backends and the batching embedder.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Backend signalled rate limiting (HTTP 429).
    #[error("Embedding backend rate limited the request: {0}")]
    RateLimited(String),
    /// Network-level failure before a response arrived.
    #[error("Embedding backend unreachable: {0}")]
    Transport(String),
    /// Backend refused the request (malformed input, auth failure, server error).
    #[error("Embedding backend rejected the request ({status}): {body}")]
    Rejected {
        /// HTTP status returned by the backend.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Backend answered with something other than one vector per input.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider is missing required settings.
    #[error("Embedding provider not configured: {0}")]
    NotConfigured(String),
    /// A batch kept failing with retryable errors until the retry budget ran out.
    #[error("Embedding retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: Box<EmbeddingError>,
    },
}

impl EmbeddingError {
    /// Whether a fresh attempt of the same batch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transport(_))
    }
}

/// Interface implemented by embedding services.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Produce one vector per text, in input order, in a single request.
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Outcome of one batch when the caller wants per-batch results.
#[derive(Debug)]
pub struct BatchEmbedding {
    /// Positions of the batch within the input slice.
    pub range: Range<usize>,
    /// Vectors for the batch, or the error that ended it.
    pub result: Result<Vec<Vec<f32>>, EmbeddingError>,
}

/// Default number of texts per embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Batching, retrying front end over an [`EmbeddingBackend`].
#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Embedder {
    /// Wrap a backend with explicit batching and retry settings.
    pub fn new(backend: Arc<dyn EmbeddingBackend>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Build the embedder selected by configuration.
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingError> {
        let backend: Arc<dyn EmbeddingBackend> = match config.embedding_provider {
            EmbeddingProvider::AzureOpenAi => Arc::new(AzureOpenAiBackend::from_config(config)?),
            EmbeddingProvider::Local => Arc::new(HashingBackend::new(config.embedding_dimension)),
        };
        tracing::info!(
            provider = ?config.embedding_provider,
            model = %config.embedding_model,
            batch_size = config.embedding_batch_size,
            "Embedding client initialized"
        );
        Ok(Self::new(
            backend,
            config.embedding_batch_size,
            RetryPolicy::new(config.embedding_max_retries, config.embedding_backoff_base),
        ))
    }

    /// Texts submitted per request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed every text, preserving order. Any failed batch fails the whole call.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (index, batch) in texts.chunks(self.batch_size).enumerate() {
            let start = index * self.batch_size;
            vectors.extend(self.embed_batch(start..start + batch.len(), batch).await?);
        }
        Ok(vectors)
    }

    /// Embed a single text, e.g. a search query.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no vector returned for query".into()))
    }

    /// Embed every batch, reporting each batch's outcome instead of stopping at the first
    /// failure. Batches are still issued sequentially.
    pub async fn embed_batches(&self, texts: &[String]) -> Vec<BatchEmbedding> {
        let mut outcomes = Vec::new();
        for (index, batch) in texts.chunks(self.batch_size).enumerate() {
            let start = index * self.batch_size;
            let range = start..start + batch.len();
            let result = self.embed_batch(range.clone(), batch).await;
            outcomes.push(BatchEmbedding { range, result });
        }
        outcomes
    }

    async fn embed_batch(
        &self,
        range: Range<usize>,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let label = format!("embed batch {}..{}", range.start, range.end);
        let vectors = self
            .retry
            .run(&label, EmbeddingError::is_retryable, || {
                self.backend.generate_embeddings(batch)
            })
            .await
            .map_err(|error| match error {
                RetryError::Fatal(error) => error,
                RetryError::Exhausted { attempts, last } => EmbeddingError::RetryExhausted {
                    attempts,
                    last: Box::new(last),
                },
            })?;

        if vectors.len() != batch.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        tracing::debug!(start = range.start, end = range.end, "Embedded batch");
        Ok(vectors)
    }
}
