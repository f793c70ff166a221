//! Service configuration.
//!
//! Each section has defaults matching a local development deployment and can
//! be loaded from environment variables with a fixed prefix (`ES_`, `VLLM_`,
//! `EMBEDDING_`, `RAG_`). [`AppConfig::validate`] checks every range the
//! pipeline relies on.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::{MAX_TOP_K, SearchType};
use crate::error::{RagError, Result};

/// Connection settings for the Elasticsearch document index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub url: String,
    pub index_name: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub retry_on_timeout: bool,
    pub max_retries: u32,
    /// Expected `dims` of the embedding field.
    pub vector_dimension: usize,
    pub text_field: String,
    pub embedding_field: String,
    pub metadata_fields: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:9200".into(),
            index_name: "rag_documents".into(),
            username: None,
            password: None,
            timeout_secs: 30,
            retry_on_timeout: true,
            max_retries: 3,
            vector_dimension: 384,
            text_field: "text".into(),
            embedding_field: "embedding".into(),
            metadata_fields: ["filename", "chunk_id", "page_number", "document_type"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl IndexConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for the OpenAI-compatible generation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub url: String,
    pub model_name: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".into(),
            model_name: "RedHatAI/granite-3.1-8b-instruct".into(),
            api_key: None,
            timeout_secs: 60,
            max_retries: 3,
            temperature: 0.7,
            max_tokens: 512,
            top_p: 0.9,
            top_k: 50,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Device the embedding model runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            other => Err(format!("device must be cpu, cuda, or mps (got '{other}')")),
        }
    }
}

/// Settings for the embedding model server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_name: String,
    /// Base URL of an OpenAI-compatible `/v1/embeddings` server.
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub device: Device,
    pub batch_size: usize,
    pub normalize_embeddings: bool,
    /// Concurrent encode calls allowed against the model.
    pub max_concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "sentence-transformers/all-MiniLM-L6-v2".into(),
            url: "http://localhost:8080".into(),
            api_key: None,
            device: Device::Cpu,
            batch_size: 32,
            normalize_embeddings: true,
            max_concurrency: 4,
            timeout_secs: 30,
        }
    }
}

/// Default retrieval parameters, overridable per request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Minimum raw backend score for a hit to be kept.
    pub similarity_threshold: f32,
    pub search_type: SearchType,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5, similarity_threshold: 0.7, search_type: SearchType::Vector }
    }
}

impl RetrievalConfig {
    /// Create a new builder for constructing a [`RetrievalConfig`].
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`RetrievalConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    /// Set the default number of chunks to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum raw score for a hit to be kept.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.config.search_type = search_type;
        self
    }

    /// Build the [`RetrievalConfig`], validating its ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `top_k` is outside `1..=20`
    /// - `similarity_threshold` is outside `0.0..=1.0`
    pub fn build(self) -> Result<RetrievalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl RetrievalConfig {
    fn validate(&self) -> Result<()> {
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(RagError::ConfigError(format!(
                "top_k must be between 1 and {MAX_TOP_K} (got {})",
                self.top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold must be between 0.0 and 1.0 (got {})",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// What a query response includes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResponseConfig {
    pub include_metadata: bool,
    pub include_sources: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self { include_metadata: true, include_sources: true }
    }
}

/// All configuration sections of the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub index: IndexConfig,
    pub generation: GenerationConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub response: ResponseConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, falling back to
    /// defaults for missing keys.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] naming the variable when a value
    /// cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup: &lookup };
        let defaults = Self::default();

        let index = IndexConfig {
            url: env.string("ES_URL", defaults.index.url),
            index_name: env.string("ES_INDEX_NAME", defaults.index.index_name),
            username: env.optional("ES_USERNAME"),
            password: env.optional("ES_PASSWORD"),
            timeout_secs: env.parse("ES_TIMEOUT", defaults.index.timeout_secs)?,
            retry_on_timeout: env.flag("ES_RETRY_ON_TIMEOUT", defaults.index.retry_on_timeout)?,
            max_retries: env.parse("ES_MAX_RETRIES", defaults.index.max_retries)?,
            vector_dimension: env.parse("ES_VECTOR_DIMENSION", defaults.index.vector_dimension)?,
            text_field: env.string("ES_TEXT_FIELD", defaults.index.text_field),
            embedding_field: env.string("ES_EMBEDDING_FIELD", defaults.index.embedding_field),
            metadata_fields: env
                .optional("ES_METADATA_FIELDS")
                .map(|v| {
                    v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
                })
                .unwrap_or(defaults.index.metadata_fields),
        };

        let generation = GenerationConfig {
            url: env.string("VLLM_URL", defaults.generation.url),
            model_name: env.string("VLLM_MODEL_NAME", defaults.generation.model_name),
            api_key: env.optional("VLLM_API_KEY"),
            timeout_secs: env.parse("VLLM_TIMEOUT", defaults.generation.timeout_secs)?,
            max_retries: env.parse("VLLM_MAX_RETRIES", defaults.generation.max_retries)?,
            temperature: env.parse("VLLM_TEMPERATURE", defaults.generation.temperature)?,
            max_tokens: env.parse("VLLM_MAX_TOKENS", defaults.generation.max_tokens)?,
            top_p: env.parse("VLLM_TOP_P", defaults.generation.top_p)?,
            top_k: env.parse("VLLM_TOP_K", defaults.generation.top_k)?,
        };

        let embedding = EmbeddingConfig {
            model_name: env.string("EMBEDDING_MODEL_NAME", defaults.embedding.model_name),
            url: env.string("EMBEDDING_URL", defaults.embedding.url),
            api_key: env.optional("EMBEDDING_API_KEY"),
            device: env.parse("EMBEDDING_DEVICE", defaults.embedding.device)?,
            batch_size: env.parse("EMBEDDING_BATCH_SIZE", defaults.embedding.batch_size)?,
            normalize_embeddings: env
                .flag("EMBEDDING_NORMALIZE_EMBEDDINGS", defaults.embedding.normalize_embeddings)?,
            max_concurrency: env
                .parse("EMBEDDING_MAX_CONCURRENCY", defaults.embedding.max_concurrency)?,
            timeout_secs: env.parse("EMBEDDING_TIMEOUT", defaults.embedding.timeout_secs)?,
        };

        let retrieval = RetrievalConfig {
            top_k: env.parse("RAG_TOP_K", defaults.retrieval.top_k)?,
            similarity_threshold: env
                .parse("RAG_SIMILARITY_THRESHOLD", defaults.retrieval.similarity_threshold)?,
            search_type: env.parse("RAG_SEARCH_TYPE", defaults.retrieval.search_type)?,
        };

        let response = ResponseConfig {
            include_metadata: env.flag("RAG_INCLUDE_METADATA", defaults.response.include_metadata)?,
            include_sources: env.flag("RAG_INCLUDE_SOURCES", defaults.response.include_sources)?,
        };

        Ok(Self { index, generation, embedding, retrieval, response })
    }

    /// Check every range and required value.
    ///
    /// # Errors
    ///
    /// Returns the first [`RagError::ConfigError`] found.
    pub fn validate(&self) -> Result<()> {
        require(!self.index.url.is_empty(), "ES_URL must not be empty")?;
        require(!self.index.index_name.is_empty(), "ES_INDEX_NAME must not be empty")?;
        require(self.index.timeout_secs > 0, "ES_TIMEOUT must be greater than zero")?;
        require(self.index.vector_dimension > 0, "ES_VECTOR_DIMENSION must be greater than zero")?;

        require(!self.generation.url.is_empty(), "VLLM_URL must not be empty")?;
        require(!self.generation.model_name.is_empty(), "VLLM_MODEL_NAME must not be empty")?;
        require(self.generation.timeout_secs > 0, "VLLM_TIMEOUT must be greater than zero")?;
        require(
            (0.0..=2.0).contains(&self.generation.temperature),
            "VLLM_TEMPERATURE must be between 0.0 and 2.0",
        )?;
        require(
            (1..=4096).contains(&self.generation.max_tokens),
            "VLLM_MAX_TOKENS must be between 1 and 4096",
        )?;
        require((0.0..=1.0).contains(&self.generation.top_p), "VLLM_TOP_P must be between 0.0 and 1.0")?;
        require((1..=100).contains(&self.generation.top_k), "VLLM_TOP_K must be between 1 and 100")?;

        require(!self.embedding.url.is_empty(), "EMBEDDING_URL must not be empty")?;
        require(self.embedding.batch_size > 0, "EMBEDDING_BATCH_SIZE must be greater than zero")?;
        require(
            self.embedding.max_concurrency > 0,
            "EMBEDDING_MAX_CONCURRENCY must be greater than zero",
        )?;

        self.retrieval.validate()
    }
}

fn require(condition: bool, message: &str) -> Result<()> {
    if condition { Ok(()) } else { Err(RagError::ConfigError(message.to_string())) }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.optional(key).unwrap_or(default)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| RagError::ConfigError(format!("invalid value for {key} ('{raw}'): {e}"))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.optional(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(RagError::ConfigError(format!("invalid boolean for {key}: '{raw}'"))),
            },
            None => Ok(default),
        }
    }
}
