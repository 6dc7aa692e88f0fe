//! OCR collaborator: the trait the pipeline depends on and its Document Intelligence adapter.

use crate::config::Config;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode, header::HeaderValue};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_POLLS: u32 = 150;

/// Errors returned by OCR backends.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The OCR service is not configured for this process.
    #[error("OCR backend not configured: {0}")]
    NotConfigured(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The OCR service answered with an unexpected status code.
    #[error("Unexpected OCR response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// The analysis finished unsuccessfully or never finished.
    #[error("OCR analysis failed: {0}")]
    AnalysisFailed(String),
}

/// Input handed to the OCR collaborator.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// Publicly reachable document URL.
    Url(String),
    /// Raw document bytes (PDF, TIFF, ...).
    Bytes(Vec<u8>),
}

/// Interface implemented by OCR services.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Analyze a document and return the raw result (`{"analyzeResult": {...}}`).
    async fn analyze(&self, source: &DocumentSource) -> Result<Value, OcrError>;
}

/// REST adapter for Azure AI Document Intelligence `:analyze` with long-running polling.
pub struct DocumentIntelligenceClient {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) api_version: String,
    pub(crate) poll_interval: Duration,
    pub(crate) max_polls: u32,
}

impl DocumentIntelligenceClient {
    /// Build a client from configuration; fails when no OCR endpoint is configured.
    pub fn from_config(config: &Config) -> Result<Self, OcrError> {
        let endpoint = config
            .ocr_endpoint
            .clone()
            .ok_or_else(|| OcrError::NotConfigured("OCR_ENDPOINT is not set".into()))?;
        let client = Client::builder()
            .user_agent("periodex/0.1")
            .timeout(Duration::from_secs(60))
            .build()?;
        tracing::debug!(endpoint = %endpoint, model = %config.ocr_model, "Initialized OCR client");
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.ocr_api_key.clone(),
            model: config.ocr_model.clone(),
            api_version: config.ocr_api_version.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    fn with_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if !key.is_empty() => request.header("Ocp-Apim-Subscription-Key", key),
            _ => request,
        }
    }

    async fn poll(&self, operation_url: &str) -> Result<Value, OcrError> {
        for poll in 0..self.max_polls {
            if poll > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            let response = self
                .with_key(self.client.get(operation_url))
                .send()
                .await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(OcrError::UnexpectedStatus { status, body });
            }

            let payload: Value = response.json().await?;
            match payload.get("status").and_then(Value::as_str) {
                Some("succeeded") => return Ok(payload),
                Some("failed") | Some("canceled") => {
                    let detail = payload
                        .get("error")
                        .map(Value::to_string)
                        .unwrap_or_else(|| "no error detail".into());
                    return Err(OcrError::AnalysisFailed(detail));
                }
                other => {
                    tracing::trace!(status = ?other, poll, "OCR analysis still running");
                }
            }
        }

        Err(OcrError::AnalysisFailed(format!(
            "analysis did not finish after {} polls",
            self.max_polls
        )))
    }
}

#[async_trait]
impl OcrBackend for DocumentIntelligenceClient {
    async fn analyze(&self, source: &DocumentSource) -> Result<Value, OcrError> {
        let body = match source {
            DocumentSource::Url(url) => json!({ "urlSource": url }),
            DocumentSource::Bytes(bytes) => json!({ "base64Source": BASE64.encode(bytes) }),
        };
        let url = format!(
            "{}/documentintelligence/documentModels/{}:analyze",
            self.endpoint, self.model
        );

        let response = self
            .with_key(self.client.post(url))
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("stringIndexType", "unicodeCodePoint"),
            ])
            .json(&body)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "OCR analyze request rejected");
            return Err(OcrError::UnexpectedStatus { status, body });
        }

        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|value: &HeaderValue| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                OcrError::AnalysisFailed("response carried no Operation-Location header".into())
            })?;

        tracing::debug!(operation = %operation_url, "OCR analysis accepted; polling");
        self.poll(&operation_url).await
    }
}
