//! Generation client trait, sampling parameters, and failure classification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::{GenerationErrorKind, Result};
use crate::health::ComponentHealth;

/// Per-request generation overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl LlmOverrides {
    /// Check request-supplied ranges.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err("temperature must be between 0.0 and 2.0".into());
            }
        }
        if let Some(m) = self.max_tokens {
            if !(1..=4096).contains(&m) {
                return Err("max_tokens must be between 1 and 4096".into());
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err("top_p must be between 0.0 and 1.0".into());
            }
        }
        if let Some(k) = self.top_k {
            if !(1..=100).contains(&k) {
                return Err("top_k must be between 1 and 100".into());
            }
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err("model must not be empty".into());
        }
        Ok(())
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    /// Sent only to backends that accept it (vLLM does).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl GenerationParams {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            top_k: Some(config.top_k),
        }
    }

    /// A new parameter set with `overrides` applied; `self` is untouched.
    pub fn with_overrides(&self, overrides: Option<&LlmOverrides>) -> Self {
        let Some(o) = overrides else {
            return self.clone();
        };
        Self {
            model: o.model.clone().unwrap_or_else(|| self.model.clone()),
            temperature: o.temperature.unwrap_or(self.temperature),
            max_tokens: o.max_tokens.unwrap_or(self.max_tokens),
            top_p: o.top_p.unwrap_or(self.top_p),
            top_k: o.top_k.or(self.top_k),
        }
    }
}

/// Token counts reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    /// Zero when the backend does not report usage.
    pub usage: TokenUsage,
    /// Model that produced the text.
    pub model: String,
}

/// An LLM backend that turns a prompt into an answer.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationError`](crate::RagError::GenerationError)
    /// with a classified [`GenerationErrorKind`].
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<GenerationResult>;

    /// Check reachability without generating. Never fails.
    async fn check_health(&self) -> ComponentHealth;
}

/// Classify an unsuccessful HTTP status from an OpenAI-compatible server.
pub fn classify_status(status: u16, body: &str) -> GenerationErrorKind {
    let lowered = body.to_ascii_lowercase();
    let model_missing = lowered.contains("does not exist")
        || lowered.contains("model_not_found")
        || lowered.contains("model not found");
    match status {
        404 => GenerationErrorKind::ModelNotFound,
        400 if model_missing => GenerationErrorKind::ModelNotFound,
        408 | 504 => GenerationErrorKind::Timeout,
        502 | 503 => GenerationErrorKind::Network,
        _ => GenerationErrorKind::Unknown,
    }
}

/// Classify a transport failure.
pub fn classify_transport(e: &reqwest::Error) -> GenerationErrorKind {
    if e.is_timeout() {
        GenerationErrorKind::Timeout
    } else if e.is_connect() || e.is_request() {
        GenerationErrorKind::Network
    } else {
        GenerationErrorKind::Unknown
    }
}
