//! Retrieval coordination: resolving per-request search parameters and
//! running the search with failure isolation.

use std::sync::Arc;
use std::time::Instant;

use docqa_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::RetrievalConfig;
use crate::document::{MAX_TOP_K, MetadataFilters, RetrievedChunk, SearchMode, SearchSpec, SearchType};
use crate::embedding::EmbeddingProvider;
use crate::health::ComponentHealth;
use crate::index::DocumentIndex;

const SUBSYSTEM: &str = "retrieval";

/// Per-request retrieval overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<SearchType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_filters: Option<MetadataFilters>,
    /// Free-text part of a hybrid or keyword search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_query: Option<String>,
}

impl RetrievalOverrides {
    /// Check request-supplied ranges.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(top_k) = self.top_k {
            if top_k == 0 || top_k > MAX_TOP_K {
                return Err(format!("top_k must be between 1 and {MAX_TOP_K}"));
            }
        }
        if let Some(threshold) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("similarity_threshold must be between 0.0 and 1.0".into());
            }
        }
        Ok(())
    }
}

/// Runs searches against a [`DocumentIndex`] on behalf of the pipeline.
///
/// Retrieval failures never propagate: they are logged, counted in the
/// `retrieval` error metric, and reported as an empty result.
pub struct Retriever {
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<EmbeddingProvider>,
    defaults: RetrievalConfig,
    metrics: Metrics,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<EmbeddingProvider>,
        defaults: RetrievalConfig,
        metrics: Metrics,
    ) -> Self {
        Self { index, embedder, defaults, metrics }
    }

    pub fn index(&self) -> &Arc<dyn DocumentIndex> {
        &self.index
    }

    pub fn defaults(&self) -> &RetrievalConfig {
        &self.defaults
    }

    /// Merge overrides with the defaults. `top_k` is clamped to `1..=20`.
    /// Hybrid and keyword searches without a text query fall back to vector.
    pub fn resolve_spec(&self, overrides: Option<&RetrievalOverrides>) -> SearchSpec {
        let o = overrides.cloned().unwrap_or_default();
        let top_k = o.top_k.unwrap_or(self.defaults.top_k).clamp(1, MAX_TOP_K);
        let similarity_threshold = o.similarity_threshold.unwrap_or(self.defaults.similarity_threshold);
        let search_type = o.search_type.unwrap_or(self.defaults.search_type);
        let text = o.text_query.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

        let mode = match (search_type, text) {
            (SearchType::Vector, _) => SearchMode::Vector,
            (SearchType::Hybrid, Some(text)) => SearchMode::Hybrid { text },
            (SearchType::Keyword, Some(text)) => SearchMode::Keyword { text },
            (requested, None) => {
                warn!(search_type = %requested, "no text query supplied, falling back to vector search");
                SearchMode::Vector
            }
        };

        SearchSpec { top_k, similarity_threshold, mode, filters: o.metadata_filters.unwrap_or_default() }
    }

    /// Embed `question` and search. Returns an empty list on any failure.
    pub async fn retrieve(
        &self,
        question: &str,
        overrides: Option<&RetrievalOverrides>,
    ) -> Vec<RetrievedChunk> {
        let spec = self.resolve_spec(overrides);
        let embedding = match self.embedder.embed(question).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(error = %e, "failed to embed query for retrieval");
                self.metrics.record_error(e.error_type(), SUBSYSTEM);
                return Vec::new();
            }
        };
        self.retrieve_with_embedding(&embedding, &spec).await
    }

    /// Search with an already computed query embedding. Returns an empty list
    /// on failure.
    pub async fn retrieve_with_embedding(
        &self,
        embedding: &[f32],
        spec: &SearchSpec,
    ) -> Vec<RetrievedChunk> {
        let started = Instant::now();
        let search_type = spec.mode.search_type();

        let mut chunks = match self.index.search(spec, embedding).await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(index = self.index.name(), %search_type, error = %e, "error retrieving documents");
                self.metrics.record_error(e.error_type(), SUBSYSTEM);
                Vec::new()
            }
        };
        chunks.truncate(spec.top_k);

        self.metrics.record_chunks_retrieved(search_type.as_str(), chunks.len());
        info!(
            %search_type,
            num_documents = chunks.len(),
            top_score = chunks.first().map(|c| c.score).unwrap_or(0.0),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieved documents"
        );
        chunks
    }

    pub async fn health(&self) -> ComponentHealth {
        self.index.health().await
    }
}
