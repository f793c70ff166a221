//! Query responses and per-query processing metrics.

use serde::{Deserialize, Serialize};

use crate::document::DocumentSource;
use crate::generation::TokenUsage;

/// Answer returned when retrieval finds nothing.
pub const NO_RESULTS_ANSWER: &str = "I couldn't find any relevant information to answer your question. \
Please try rephrasing or ask a different question.";

/// Boost applied to the mean score when more than one source supports an answer.
pub const MULTI_SOURCE_BOOST: f32 = 1.1;

/// Confidence of an answer given its sources.
///
/// Mean of the normalized source scores, times [`MULTI_SOURCE_BOOST`] when
/// there is more than one source, capped at 1.0. Zero without sources.
pub fn confidence_score(sources: &[DocumentSource]) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }
    let mean = sources.iter().map(|s| s.score).sum::<f32>() / sources.len() as f32;
    let boosted = if sources.len() > 1 { mean * MULTI_SOURCE_BOOST } else { mean };
    boosted.clamp(0.0, 1.0)
}

/// Timings and counts gathered while answering one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingMetrics {
    pub query_embedding_time_ms: u64,
    pub retrieval_time_ms: u64,
    pub llm_generation_time_ms: u64,
    pub total_processing_time_ms: u64,
    pub chunks_retrieved: usize,
    pub usage: TokenUsage,
}

impl ProcessingMetrics {
    pub fn into_metadata(self, model_used: impl Into<String>) -> QueryMetadata {
        QueryMetadata {
            processing_time_ms: self.total_processing_time_ms,
            model_used: model_used.into(),
            chunks_retrieved: self.chunks_retrieved,
            query_embedding_time_ms: self.query_embedding_time_ms,
            search_time_ms: self.retrieval_time_ms,
            llm_time_ms: self.llm_generation_time_ms,
            total_tokens: self.usage.total_tokens,
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
        }
    }
}

/// Processing details attached to an answered query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub processing_time_ms: u64,
    pub model_used: String,
    pub chunks_retrieved: usize,
    pub query_embedding_time_ms: u64,
    pub search_time_ms: u64,
    pub llm_time_ms: u64,
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Sources in relevance order; empty when disabled or not answered.
    #[serde(default)]
    pub sources: Vec<DocumentSource>,
    #[serde(default)]
    pub query_metadata: Option<QueryMetadata>,
    /// In `[0, 1]`.
    #[serde(default)]
    pub confidence_score: Option<f32>,
}

impl QueryResponse {
    /// A response with no sources, no metadata and zero confidence.
    pub fn fallback(answer: impl Into<String>) -> Self {
        Self { answer: answer.into(), sources: Vec::new(), query_metadata: None, confidence_score: Some(0.0) }
    }

    /// Drop sources and/or metadata. Confidence is kept.
    pub fn restrict(mut self, include_sources: bool, include_metadata: bool) -> Self {
        if !include_sources {
            self.sources.clear();
        }
        if !include_metadata {
            self.query_metadata = None;
        }
        self
    }
}
