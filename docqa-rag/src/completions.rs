//! [`GenerationClient`] for OpenAI-compatible `/v1/chat/completions`
//! servers such as vLLM.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::config::GenerationConfig;
use crate::error::{GenerationErrorKind, RagError, Result};
use crate::generation::{
    GenerationClient, GenerationParams, GenerationResult, TokenUsage, classify_status,
    classify_transport,
};
use crate::health::{ComponentHealth, GENERATION_COMPONENT};

const BACKEND: &str = "vllm";

/// Chat completions client.
///
/// Transient failures (network, timeout) are retried up to `max_retries`
/// times with a linear backoff; other failures are returned immediately.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ChatCompletionsClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build generation client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            default_model: config.model_name.clone(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(500),
        })
    }

    /// Base delay between retries; attempt `n` waits `n * backoff`.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn error(kind: GenerationErrorKind, message: impl Into<String>) -> RagError {
        RagError::GenerationError { backend: BACKEND.into(), kind, message: message.into() }
    }

    async fn complete_once(&self, body: &ChatRequest<'_>) -> Result<GenerationResult> {
        let response = self
            .post("/v1/chat/completions")
            .json(body)
            .send()
            .await
            .map_err(|e| Self::error(classify_transport(&e), format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail =
                serde_json::from_str::<ErrorResponse>(&text).map(|e| e.message()).unwrap_or_else(|_| text.clone());
            return Err(Self::error(
                classify_status(status.as_u16(), &text),
                format!("API returned {status}: {detail}"),
            ));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            Self::error(GenerationErrorKind::Unknown, format!("failed to parse response: {e}"))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Self::error(GenerationErrorKind::Unknown, "response has no choices"))?;
        let usage = parsed.usage.map(TokenUsage::from).unwrap_or_default();

        Ok(GenerationResult { text, usage, model: parsed.model.unwrap_or_else(|| body.model.to_string()) })
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(u: Usage) -> Self {
        Self { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, total_tokens: u.total_tokens }
    }
}

/// OpenAI nests the message under `error`; vLLM puts it at the top level.
#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<ErrorDetail>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl ErrorResponse {
    fn message(self) -> String {
        self.error.map(|e| e.message).or(self.message).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

// ── GenerationClient implementation ────────────────────────────────

#[async_trait]
impl GenerationClient for ChatCompletionsClient {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<GenerationResult> {
        let body = ChatRequest {
            model: &params.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            top_k: params.top_k,
            stream: false,
        };

        let mut attempt = 0u32;
        loop {
            match self.complete_once(&body).await {
                Ok(result) => {
                    debug!(model = %result.model, total_tokens = result.usage.total_tokens, "generation completed");
                    return Ok(result);
                }
                Err(RagError::GenerationError { kind, message, .. })
                    if kind.is_transient() && attempt < self.max_retries =>
                {
                    attempt += 1;
                    warn!(%kind, attempt, max_retries = self.max_retries, error = %message, "retrying generation");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    error!(model = %params.model, error = %e, "generation failed");
                    return Err(e);
                }
            }
        }
    }

    async fn check_health(&self) -> ComponentHealth {
        let mut request = self.client.get(format!("{}/v1/models", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let models = match request.send().await {
            Ok(response) if response.status().is_success() => {
                response.json::<ModelList>().await.map(|l| l.data).unwrap_or_default()
            }
            Ok(response) => {
                let status = response.status();
                return ComponentHealth::unhealthy(
                    GENERATION_COMPONENT,
                    format!("generation backend returned {status}"),
                    json!({ "connection_healthy": false, "model_name": self.default_model }),
                );
            }
            Err(e) => {
                let kind = classify_transport(&e);
                warn!(%kind, error = %e, "generation health check failed");
                return ComponentHealth::unhealthy(
                    GENERATION_COMPONENT,
                    "generation backend unreachable",
                    json!({
                        "connection_healthy": false,
                        "model_name": self.default_model,
                        "error_type": kind.as_str(),
                    }),
                );
            }
        };

        let served: Vec<String> = models.into_iter().map(|m| m.id).collect();
        let model_available = served.iter().any(|id| id == &self.default_model);
        let details = json!({
            "connection_healthy": true,
            "model_name": self.default_model,
            "model_available": model_available,
            "served_models": served,
        });

        if model_available {
            ComponentHealth::healthy(GENERATION_COMPONENT, details)
        } else {
            ComponentHealth::unhealthy(
                GENERATION_COMPONENT,
                format!("model {} is not served", self.default_model),
                details,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let params = GenerationParams::from_config(&GenerationConfig::default());
        let body = ChatRequest {
            model: &params.model,
            messages: vec![ChatMessage { role: "user", content: "hi" }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            top_k: None,
            stream: false,
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["messages"], json!([{ "role": "user", "content": "hi" }]));
        assert_eq!(value["stream"], false);
        assert!(value.get("top_k").is_none());
    }

    #[test]
    fn response_parsing_tolerates_missing_usage() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#)
                .unwrap();
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("ok"));
    }

    #[test]
    fn error_messages_from_both_shapes() {
        let openai: ErrorResponse = serde_json::from_str(r#"{"error":{"message":"nope"}}"#).unwrap();
        assert_eq!(openai.message(), "nope");
        let vllm: ErrorResponse = serde_json::from_str(r#"{"message":"missing"}"#).unwrap();
        assert_eq!(vllm.message(), "missing");
    }

    #[test]
    fn base_url_is_trimmed() {
        let config = GenerationConfig { url: "http://vllm:8000/".into(), ..GenerationConfig::default() };
        assert_eq!(ChatCompletionsClient::new(&config).unwrap().base_url(), "http://vllm:8000");
    }
}
