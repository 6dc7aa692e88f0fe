use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the ingestion pipeline and the query server.
///
/// Built once at process start and handed to each component constructor; nothing below
/// this type reads the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the search service hosting the chunk index.
    pub search_endpoint: String,
    /// Optional admin/query key for the search service.
    pub search_api_key: Option<String>,
    /// Name of the index that stores chunk documents.
    pub search_index_name: String,
    /// REST API version passed to the search service.
    pub search_api_version: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Base URL of the embedding service (required for hosted providers).
    pub embedding_endpoint: Option<String>,
    /// Key for the embedding service.
    pub embedding_api_key: Option<String>,
    /// Embedding deployment / model identifier.
    pub embedding_model: String,
    /// REST API version passed to the embedding service.
    pub embedding_api_version: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Number of texts submitted per embedding request.
    pub embedding_batch_size: usize,
    /// Retries allowed for a rate-limited or unreachable embedding batch.
    pub embedding_max_retries: u32,
    /// Exponential backoff base in seconds; retry `n` waits `base^n`.
    pub embedding_backoff_base: f64,
    /// What the pipeline does when an embedding batch ultimately fails.
    pub embedding_failure_policy: EmbeddingFailurePolicy,
    /// Chunk window size in characters.
    pub chunk_window_size: usize,
    /// Overlap between adjacent chunk windows in characters.
    pub chunk_overlap: usize,
    /// Documents per index upload request.
    pub upsert_batch_size: usize,
    /// Worker count for batch ingestion.
    pub max_workers: usize,
    /// Root directory of the staging blob store.
    pub staging_root: String,
    /// Prefix under which intermediate OCR JSON blobs are staged.
    pub staging_prefix: String,
    /// Prefix under which processed-fingerprint markers are written.
    pub marker_prefix: String,
    /// Blob key of the one-time index reset flag.
    pub reset_flag_key: String,
    /// Base URL of the OCR service, when documents are OCR'd by this process.
    pub ocr_endpoint: Option<String>,
    /// Key for the OCR service.
    pub ocr_api_key: Option<String>,
    /// OCR model identifier.
    pub ocr_model: String,
    /// REST API version passed to the OCR service.
    pub ocr_api_version: String,
    /// Result count used when a query does not specify `top_k`.
    pub search_default_top_k: usize,
    /// Upper bound applied to requested `top_k`.
    pub search_max_top_k: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Hosted Azure OpenAI deployments API.
    AzureOpenAi,
    /// Deterministic in-process hashing vectors, for offline runs.
    Local,
}

/// Policy applied when an embedding batch fails after retries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmbeddingFailurePolicy {
    /// Fail the whole document.
    #[default]
    Abort,
    /// Substitute zero vectors for the failed batch and keep going, logging the degradation.
    ZeroVector,
}

/// Upper bound on documents per upload request accepted by the search service.
pub const MAX_UPSERT_BATCH_SIZE: usize = 1000;

impl Config {
    /// Load `.env` (when present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            search_endpoint = %config.search_endpoint,
            index = %config.search_index_name,
            embedding_provider = ?config.embedding_provider,
            embedding_model = %config.embedding_model,
            embedding_dimension = config.embedding_dimension,
            server_port = ?config.server_port,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            search_endpoint: load_env("SEARCH_ENDPOINT")?,
            search_api_key: load_env_optional("SEARCH_API_KEY"),
            search_index_name: load_env_or("SEARCH_INDEX_NAME", "periodical-chunks"),
            search_api_version: load_env_or("SEARCH_API_VERSION", "2024-07-01"),
            embedding_provider: parse_env_or("EMBEDDING_PROVIDER", EmbeddingProvider::AzureOpenAi)?,
            embedding_endpoint: load_env_optional("EMBEDDING_ENDPOINT"),
            embedding_api_key: load_env_optional("EMBEDDING_API_KEY"),
            embedding_model: load_env_or("EMBEDDING_MODEL", "text-embedding-3-large"),
            embedding_api_version: load_env_or("EMBEDDING_API_VERSION", "2024-06-01"),
            embedding_dimension: parse_env_or("EMBEDDING_DIMENSION", 3072)?,
            embedding_batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 16)?,
            embedding_max_retries: parse_env_or("EMBEDDING_MAX_RETRIES", 5)?,
            embedding_backoff_base: parse_env_or("EMBEDDING_BACKOFF_BASE", 2.0)?,
            embedding_failure_policy: parse_env_or(
                "EMBEDDING_FAILURE_POLICY",
                EmbeddingFailurePolicy::Abort,
            )?,
            chunk_window_size: parse_env_or("CHUNK_WINDOW_SIZE", 900)?,
            chunk_overlap: parse_env_or("CHUNK_OVERLAP", 120)?,
            upsert_batch_size: parse_env_or("UPSERT_BATCH_SIZE", MAX_UPSERT_BATCH_SIZE)?,
            max_workers: parse_env_or("MAX_WORKERS", 8)?,
            staging_root: load_env_or("STAGING_ROOT", "data"),
            staging_prefix: load_env_or("STAGING_PREFIX", "extracted-json/"),
            marker_prefix: load_env_or("MARKER_PREFIX", "processed/"),
            reset_flag_key: load_env_or("RESET_FLAG_KEY", "function-flags/delete_done.flag"),
            ocr_endpoint: load_env_optional("OCR_ENDPOINT"),
            ocr_api_key: load_env_optional("OCR_API_KEY"),
            ocr_model: load_env_or("OCR_MODEL", "prebuilt-read"),
            ocr_api_version: load_env_or("OCR_API_VERSION", "2024-11-30"),
            search_default_top_k: parse_env_or("SEARCH_DEFAULT_TOP_K", 5)?,
            search_max_top_k: parse_env_or("SEARCH_MAX_TOP_K", 50)?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that individual parsers cannot see.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_window_size == 0 || self.chunk_overlap >= self.chunk_window_size {
            return Err(ConfigError::InvalidValue(
                "CHUNK_OVERLAP must be smaller than a non-zero CHUNK_WINDOW_SIZE".into(),
            ));
        }
        if self.embedding_batch_size == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_BATCH_SIZE".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if !(self.embedding_backoff_base > 0.0) {
            return Err(ConfigError::InvalidValue("EMBEDDING_BACKOFF_BASE".into()));
        }
        if self.upsert_batch_size == 0 || self.upsert_batch_size > MAX_UPSERT_BATCH_SIZE {
            return Err(ConfigError::InvalidValue("UPSERT_BATCH_SIZE".into()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue("MAX_WORKERS".into()));
        }
        if self.search_default_top_k == 0 || self.search_max_top_k < self.search_default_top_k {
            return Err(ConfigError::InvalidValue("SEARCH_DEFAULT_TOP_K".into()));
        }
        if self.embedding_provider == EmbeddingProvider::AzureOpenAi
            && self.embedding_endpoint.is_none()
        {
            return Err(ConfigError::MissingVariable("EMBEDDING_ENDPOINT".into()));
        }
        Ok(())
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "azure-openai" | "azure_openai" | "azureopenai" => Ok(Self::AzureOpenAi),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
}

impl FromStr for EmbeddingFailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "zero-vector" | "zero_vector" => Ok(Self::ZeroVector),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        search_endpoint: "http://127.0.0.1:9".into(),
        search_api_key: None,
        search_index_name: "periodical-chunks".into(),
        search_api_version: "2024-07-01".into(),
        embedding_provider: EmbeddingProvider::Local,
        embedding_endpoint: None,
        embedding_api_key: None,
        embedding_model: "test-model".into(),
        embedding_api_version: "2024-06-01".into(),
        embedding_dimension: 8,
        embedding_batch_size: 16,
        embedding_max_retries: 3,
        embedding_backoff_base: 2.0,
        embedding_failure_policy: EmbeddingFailurePolicy::Abort,
        chunk_window_size: 900,
        chunk_overlap: 120,
        upsert_batch_size: MAX_UPSERT_BATCH_SIZE,
        max_workers: 2,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_and_policy_names() {
        assert_eq!(
            "Azure-OpenAI".parse::<EmbeddingProvider>(),
            Ok(EmbeddingProvider::AzureOpenAi)
        );
        assert_eq!("local".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Local));
        assert!("ollama".parse::<EmbeddingProvider>().is_err());
        assert_eq!(
            "zero-vector".parse::<EmbeddingFailurePolicy>(),
            Ok(EmbeddingFailurePolicy::ZeroVector)
        );
    }

    #[test]
    fn underscore_and_case_variants_name_the_same_values() {
        for name in ["azure_openai", "AZUREOPENAI", "azure-openai"] {
            assert_eq!(
                name.parse::<EmbeddingProvider>(),
                Ok(EmbeddingProvider::AzureOpenAi)
            );
        }
        for name in ["zero_vector", "ZERO-VECTOR"] {
            assert_eq!(
                name.parse::<EmbeddingFailurePolicy>(),
                Ok(EmbeddingFailurePolicy::ZeroVector)
            );
        }
        assert_eq!("ABORT".parse::<EmbeddingFailurePolicy>(), Ok(EmbeddingFailurePolicy::Abort));
    }

    #[test]
    fn test_config_is_valid() {
        test_config().validate().expect("valid config");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        let mut config = test_config();
        config.chunk_overlap = config.chunk_window_size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn rejects_oversized_upsert_batches() {
        let mut config = test_config();
        config.upsert_batch_size = MAX_UPSERT_BATCH_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn hosted_embeddings_require_endpoint() {
        let mut config = test_config();
        config.embedding_provider = EmbeddingProvider::AzureOpenAi;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(name)) if name == "EMBEDDING_ENDPOINT"
        ));
    }
}
