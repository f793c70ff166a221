//! Embedding model served over an OpenAI-compatible embeddings API.
//!
//! Works with any server exposing `POST /v1/embeddings`, such as
//! text-embeddings-inference, vLLM, Ollama or OpenAI itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingModel;
use crate::error::{EmbeddingErrorKind, RagError, Result};

const EMBEDDINGS_PATH: &str = "/v1/embeddings";

/// An [`EmbeddingModel`] backed by an OpenAI-compatible `/v1/embeddings` endpoint.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::openai::OpenAIEmbeddingModel;
///
/// let model = OpenAIEmbeddingModel::from_config(&config.embedding)?;
/// let vectors = model.encode(&["hello world".to_string()]).await?;
/// ```
pub struct OpenAIEmbeddingModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAIEmbeddingModel {
    /// Create a model client for `model` served at `base_url`.
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}{EMBEDDINGS_PATH}", base_url.trim_end_matches('/')),
            api_key: None,
            model: model.into(),
        }
    }

    /// Create a model client from the embedding configuration section.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build embedding client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}{EMBEDDINGS_PATH}", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model_name.clone(),
        })
    }

    /// Send a bearer token with each request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn error(&self, message: String) -> RagError {
        RagError::EmbeddingError { provider: self.model.clone(), kind: EmbeddingErrorKind::Backend, message }
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── EmbeddingModel implementation ──────────────────────────────────

#[async_trait]
impl EmbeddingModel for OpenAIEmbeddingModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(batch_size = texts.len(), model = %self.model, "embedding batch");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest { model: &self.model, input: texts });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(endpoint = %self.endpoint, error = %e, "embedding request failed");
            self.error(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail =
                serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);

            error!(%status, "embedding API error");
            return Err(self.error(format!("API returned {status}: {detail}")));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(error = %e, "failed to parse embedding response");
            self.error(format!("failed to parse response: {e}"))
        })?;

        Ok(order_by_index(parsed.data))
    }
}

/// Servers may return items out of order; `index` restores input order.
fn order_by_index(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}
