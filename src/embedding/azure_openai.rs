//! Azure OpenAI embeddings adapter (`/openai/deployments/{deployment}/embeddings`).

use super::{EmbeddingBackend, EmbeddingError};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// REST client for an Azure OpenAI embeddings deployment.
pub struct AzureOpenAiBackend {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: Option<String>,
    pub(crate) deployment: String,
    pub(crate) api_version: String,
}

impl AzureOpenAiBackend {
    /// Build the adapter from configuration.
    pub fn from_config(config: &Config) -> Result<Self, EmbeddingError> {
        let endpoint = config
            .embedding_endpoint
            .clone()
            .ok_or_else(|| EmbeddingError::NotConfigured("EMBEDDING_ENDPOINT is not set".into()))?;
        let client = Client::builder()
            .user_agent("periodex/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EmbeddingError::NotConfigured(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.embedding_api_key.clone(),
            deployment: config.embedding_model.clone(),
            api_version: config.embedding_api_version.clone(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings",
            self.endpoint, self.deployment
        )
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingBackend for AzureOpenAiBackend {
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self
            .client
            .post(self.url())
            .query(&[("api-version", self.api_version.as_str())])
            .json(&EmbeddingRequest { input: texts });
        if let Some(key) = &self.api_key
            && !key.is_empty()
        {
            request = request.header("api-key", key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, deployment = %self.deployment, "Embedding request failed");
            return Err(EmbeddingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::InvalidResponse(err.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

fn classify_transport_error(error: reqwest::Error) -> EmbeddingError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        EmbeddingError::Transport(error.to_string())
    } else {
        EmbeddingError::InvalidResponse(error.to_string())
    }
}
