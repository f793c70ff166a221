//! Query orchestration.
//!
//! [`QueryPipeline`] answers a question in fixed stages: embed the question,
//! retrieve chunks, build a prompt, generate, and assemble the response.
//! Empty retrieval and generation failures still produce an answer; only
//! invalid input and an unavailable embedder fail the query.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{QueryPipeline, InMemoryIndex};
//!
//! let pipeline = QueryPipeline::builder()
//!     .index(Arc::new(InMemoryIndex::new()))
//!     .embedder(Arc::new(embedder))
//!     .generator(Arc::new(client))
//!     .build()?;
//!
//! let response = pipeline.answer_query("How do I install the operator?", None, None).await?;
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use docqa_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use crate::config::{GenerationConfig, ResponseConfig, RetrievalConfig};
use crate::document::{DocumentSource, SearchType};
use crate::embedding::{EmbeddingProvider, MAX_INPUT_CHARS};
use crate::error::{EmbeddingErrorKind, GenerationErrorKind, QueryError, RagError, Result};
use crate::generation::{GenerationClient, GenerationParams, LlmOverrides};
use crate::health::{HealthPolicy, HealthReport, PerformanceSnapshot};
use crate::index::DocumentIndex;
use crate::prompt::build_prompt;
use crate::response::{NO_RESULTS_ANSWER, ProcessingMetrics, QueryResponse, confidence_score};
use crate::retrieval::{RetrievalOverrides, Retriever};

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 2000;

/// How a completed query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Answered,
    /// Retrieval found nothing; generation was skipped.
    NoResults,
    GenerationFailed(GenerationErrorKind),
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::NoResults => "no_results",
            Self::GenerationFailed(_) => "generation_failed",
        }
    }
}

#[derive(Debug, Default)]
struct QueryCounters {
    queries: u64,
    processing_time: Duration,
}

impl QueryCounters {
    fn snapshot(&self) -> PerformanceSnapshot {
        let total = self.processing_time.as_secs_f64();
        PerformanceSnapshot {
            total_queries_processed: self.queries,
            total_processing_time_secs: total,
            average_processing_time_secs: if self.queries > 0 {
                total / self.queries as f64
            } else {
                0.0
            },
        }
    }
}

/// Default settings reported by [`QueryPipeline::info`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub rag_top_k: usize,
    pub rag_similarity_threshold: f32,
    pub rag_search_type: SearchType,
    pub vllm_temperature: f32,
    pub vllm_max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub model_name: String,
    pub index_backend: String,
    pub embedding_model: String,
    pub generation_backend: String,
    pub total_queries_processed: u64,
    pub average_processing_time_secs: f64,
    pub settings: PipelineSettings,
}

/// A model the pipeline talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// `llm` or `embedding`.
    #[serde(rename = "type")]
    pub model_type: String,
    pub provider: String,
    pub url: String,
    pub parameters: Value,
}

/// The query orchestrator. Construct one via [`QueryPipeline::builder()`].
///
/// Safe to share across concurrent queries; the only state written while
/// answering is the completed-query counters, kept behind a mutex.
pub struct QueryPipeline {
    retriever: Retriever,
    embedder: Arc<EmbeddingProvider>,
    generator: Arc<dyn GenerationClient>,
    generation_config: GenerationConfig,
    generation_defaults: GenerationParams,
    response: ResponseConfig,
    health_policy: HealthPolicy,
    metrics: Metrics,
    counters: Mutex<QueryCounters>,
}

impl QueryPipeline {
    pub fn builder() -> QueryPipelineBuilder {
        QueryPipelineBuilder::default()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn response_config(&self) -> ResponseConfig {
        self.response
    }

    /// Answer `question` from the indexed documents.
    ///
    /// # Errors
    ///
    /// - [`QueryError::InvalidRequest`] for an empty or overlong question,
    ///   out-of-range overrides, or a question that is empty once preprocessed.
    /// - [`QueryError::DependencyUnavailable`] when the embedding model is not
    ///   loaded or its backend cannot be reached.
    /// - [`QueryError::Internal`] when the embedder returns unusable vectors.
    ///
    /// Retrieval failures and generation failures are not errors: they yield
    /// a response with zero confidence and no sources.
    #[instrument(skip_all, fields(question_length = question.chars().count()))]
    pub async fn answer_query(
        &self,
        question: &str,
        llm_overrides: Option<&LlmOverrides>,
        retrieval_overrides: Option<&RetrievalOverrides>,
    ) -> std::result::Result<QueryResponse, QueryError> {
        let started = Instant::now();
        if let Err(e) = validate_request(question, llm_overrides, retrieval_overrides) {
            warn!(error = %e, "rejected query");
            self.metrics.record_error("validation", "query");
            return Err(e);
        }
        let mut stats = ProcessingMetrics::default();

        // embed
        let stage = Instant::now();
        let embedding = self.embedder.embed(question).await.map_err(|e| self.embedding_failure(e))?;
        stats.query_embedding_time_ms = self.finish_stage("embedding", stage);

        // retrieve
        let spec = self.retriever.resolve_spec(retrieval_overrides);
        let stage = Instant::now();
        let chunks = self.retriever.retrieve_with_embedding(&embedding, &spec).await;
        stats.retrieval_time_ms = self.finish_stage("retrieval", stage);
        stats.chunks_retrieved = chunks.len();

        if chunks.is_empty() {
            warn!(search_type = %spec.mode.search_type(), "no documents retrieved for query");
            self.complete(QueryOutcome::NoResults, started);
            return Ok(QueryResponse::fallback(NO_RESULTS_ANSWER));
        }

        // build prompt and generate
        let params = self.generation_defaults.with_overrides(llm_overrides);
        let prompt = build_prompt(question, &chunks);
        let stage = Instant::now();
        let generated = self.generator.generate(&prompt, &params).await.and_then(|result| {
            if result.text.trim().is_empty() {
                Err(RagError::GenerationError {
                    backend: self.generator.name().to_string(),
                    kind: GenerationErrorKind::Unknown,
                    message: "backend returned an empty answer".into(),
                })
            } else {
                Ok(result)
            }
        });
        stats.llm_generation_time_ms = self.finish_stage("generation", stage);

        let result = match generated {
            Ok(result) => result,
            Err(e) => {
                let kind = match &e {
                    RagError::GenerationError { kind, .. } => *kind,
                    _ => GenerationErrorKind::Unknown,
                };
                error!(model = %params.model, error_type = %kind, error = %e, "LLM generation failed");
                self.metrics.record_error(kind.as_str(), "generation");
                self.complete(QueryOutcome::GenerationFailed(kind), started);
                return Ok(QueryResponse::fallback(kind.user_message()));
            }
        };

        // assemble
        stats.usage = result.usage;
        self.metrics.record_tokens(&params.model, "prompt", result.usage.prompt_tokens.into());
        self.metrics.record_tokens(&params.model, "completion", result.usage.completion_tokens.into());

        let sources: Vec<DocumentSource> = chunks.iter().map(DocumentSource::from).collect();
        let confidence = confidence_score(&sources);
        let total = self.complete(QueryOutcome::Answered, started);
        stats.total_processing_time_ms = millis(total);

        info!(
            answer_length = result.text.len(),
            num_sources = sources.len(),
            confidence_score = confidence,
            total_ms = stats.total_processing_time_ms,
            "query processed"
        );

        Ok(QueryResponse {
            answer: result.text,
            sources,
            query_metadata: Some(stats.into_metadata(params.model)),
            confidence_score: Some(confidence),
        }
        .restrict(self.response.include_sources, self.response.include_metadata))
    }

    /// Check every dependency concurrently and reduce to a report.
    pub async fn health(&self) -> HealthReport {
        let (index, generation) = futures::join!(self.retriever.health(), self.generator.check_health());
        let embeddings = self.embedder.health();

        let report = HealthReport::from_components(
            vec![index, embeddings, generation],
            self.health_policy,
            self.performance(),
        );
        if !report.healthy {
            warn!(status = ?report.status, errors = ?report.errors, "pipeline health degraded");
        }
        report
    }

    pub fn info(&self) -> PipelineInfo {
        let performance = self.performance();
        let retrieval = self.retriever.defaults();
        PipelineInfo {
            model_name: self.generation_defaults.model.clone(),
            index_backend: self.retriever.index().name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            generation_backend: self.generator.name().to_string(),
            total_queries_processed: performance.total_queries_processed,
            average_processing_time_secs: performance.average_processing_time_secs,
            settings: PipelineSettings {
                rag_top_k: retrieval.top_k,
                rag_similarity_threshold: retrieval.similarity_threshold,
                rag_search_type: retrieval.search_type,
                vllm_temperature: self.generation_config.temperature,
                vllm_max_tokens: self.generation_config.max_tokens,
            },
        }
    }

    /// The configured generation and embedding models.
    pub fn models(&self) -> Vec<ModelInfo> {
        let generation = &self.generation_config;
        let embedding = self.embedder.config();
        vec![
            ModelInfo {
                name: generation.model_name.clone(),
                model_type: "llm".into(),
                provider: self.generator.name().to_string(),
                url: generation.url.clone(),
                parameters: json!({
                    "temperature": generation.temperature,
                    "max_tokens": generation.max_tokens,
                    "top_p": generation.top_p,
                    "top_k": generation.top_k,
                }),
            },
            ModelInfo {
                name: self.embedder.model_name().to_string(),
                model_type: "embedding".into(),
                provider: "openai-compatible".into(),
                url: embedding.url.clone(),
                parameters: json!({
                    "device": embedding.device,
                    "dimension": self.embedder.dimension(),
                    "max_length": MAX_INPUT_CHARS,
                    "batch_size": embedding.batch_size,
                    "normalize_embeddings": embedding.normalize_embeddings,
                }),
            },
        ]
    }

    pub fn performance(&self) -> PerformanceSnapshot {
        self.counters.lock().map(|c| c.snapshot()).unwrap_or_default()
    }

    fn embedding_failure(&self, e: RagError) -> QueryError {
        self.metrics.record_error(e.error_type(), "embedding");
        error!(error = %e, "failed to embed query");
        classify_embedding_error(&e)
    }

    fn finish_stage(&self, stage: &str, started: Instant) -> u64 {
        let elapsed = started.elapsed();
        self.metrics.record_stage_duration(stage, elapsed);
        millis(elapsed)
    }

    /// Count a query that reached the end of the pipeline.
    fn complete(&self, outcome: QueryOutcome, started: Instant) -> Duration {
        let elapsed = started.elapsed();
        self.metrics.record_query(outcome.as_str());
        self.metrics.record_stage_duration("total", elapsed);
        if let Ok(mut counters) = self.counters.lock() {
            counters.queries += 1;
            counters.processing_time += elapsed;
        }
        elapsed
    }
}

/// Map a failed query embedding onto the error returned to the caller.
fn classify_embedding_error(e: &RagError) -> QueryError {
    match e {
        RagError::EmbeddingError { kind, message, .. } => match kind {
            EmbeddingErrorKind::EmptyInput => QueryError::InvalidRequest(message.clone()),
            EmbeddingErrorKind::ModelNotLoaded | EmbeddingErrorKind::Backend => {
                QueryError::DependencyUnavailable { dependency: "embeddings", message: message.clone() }
            }
            EmbeddingErrorKind::DimensionMismatch => QueryError::Internal(e.to_string()),
        },
        _ => QueryError::Internal(e.to_string()),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn validate_request(
    question: &str,
    llm_overrides: Option<&LlmOverrides>,
    retrieval_overrides: Option<&RetrievalOverrides>,
) -> std::result::Result<(), QueryError> {
    if question.trim().is_empty() {
        return Err(QueryError::InvalidRequest("question must not be empty".into()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(QueryError::InvalidRequest(format!(
            "question must be at most {MAX_QUESTION_CHARS} characters"
        )));
    }
    if let Some(o) = llm_overrides {
        o.validate().map_err(QueryError::InvalidRequest)?;
    }
    if let Some(o) = retrieval_overrides {
        o.validate().map_err(QueryError::InvalidRequest)?;
    }
    Ok(())
}

/// Builder for a [`QueryPipeline`].
///
/// `index`, `embedder` and `generator` are required; every other setting
/// falls back to its default.
#[derive(Default)]
pub struct QueryPipelineBuilder {
    index: Option<Arc<dyn DocumentIndex>>,
    embedder: Option<Arc<EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerationClient>>,
    generation: GenerationConfig,
    retrieval: RetrievalConfig,
    response: ResponseConfig,
    health_policy: HealthPolicy,
    metrics: Option<Metrics>,
}

impl QueryPipelineBuilder {
    pub fn index(mut self, index: Arc<dyn DocumentIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the embedding provider. It should already be initialized.
    pub fn embedder(mut self, embedder: Arc<EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn GenerationClient>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Default sampling parameters and model.
    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    pub fn retrieval_config(mut self, config: RetrievalConfig) -> Self {
        self.retrieval = config;
        self
    }

    pub fn response_config(mut self, config: ResponseConfig) -> Self {
        self.response = config;
        self
    }

    pub fn health_policy(mut self, policy: HealthPolicy) -> Self {
        self.health_policy = policy;
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the [`QueryPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required component is missing
    /// or the retrieval defaults are out of range.
    pub fn build(self) -> Result<QueryPipeline> {
        let index = self.index.ok_or_else(|| RagError::ConfigError("index is required".to_string()))?;
        let embedder =
            self.embedder.ok_or_else(|| RagError::ConfigError("embedder is required".to_string()))?;
        let generator =
            self.generator.ok_or_else(|| RagError::ConfigError("generator is required".to_string()))?;
        let retrieval = RetrievalConfig::builder()
            .top_k(self.retrieval.top_k)
            .similarity_threshold(self.retrieval.similarity_threshold)
            .search_type(self.retrieval.search_type)
            .build()?;

        let metrics = self.metrics.unwrap_or_default();
        let generation_defaults = GenerationParams::from_config(&self.generation);
        Ok(QueryPipeline {
            retriever: Retriever::new(index, Arc::clone(&embedder), retrieval, metrics.clone()),
            embedder,
            generator,
            generation_config: self.generation,
            generation_defaults,
            response: self.response,
            health_policy: self.health_policy,
            metrics,
            counters: Mutex::new(QueryCounters::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_validation() {
        assert!(matches!(validate_request("  ", None, None), Err(QueryError::InvalidRequest(_))));
        let long = "x".repeat(MAX_QUESTION_CHARS + 1);
        assert!(matches!(validate_request(&long, None, None), Err(QueryError::InvalidRequest(_))));
        assert!(validate_request(&"x".repeat(MAX_QUESTION_CHARS), None, None).is_ok());
    }

    #[test]
    fn override_validation_is_applied() {
        let llm = LlmOverrides { temperature: Some(3.0), ..Default::default() };
        assert!(validate_request("q", Some(&llm), None).is_err());
        let retrieval = RetrievalOverrides { top_k: Some(0), ..Default::default() };
        assert!(validate_request("q", None, Some(&retrieval)).is_err());
    }

    #[test]
    fn embedding_errors_map_to_query_errors() {
        let embedding = |kind| RagError::EmbeddingError {
            provider: "all-MiniLM-L6-v2".into(),
            kind,
            message: "failed".into(),
        };

        assert!(matches!(
            classify_embedding_error(&embedding(EmbeddingErrorKind::EmptyInput)),
            QueryError::InvalidRequest(m) if m == "failed"
        ));
        for kind in [EmbeddingErrorKind::ModelNotLoaded, EmbeddingErrorKind::Backend] {
            assert!(matches!(
                classify_embedding_error(&embedding(kind)),
                QueryError::DependencyUnavailable { dependency: "embeddings", .. }
            ));
        }
        assert!(matches!(
            classify_embedding_error(&embedding(EmbeddingErrorKind::DimensionMismatch)),
            QueryError::Internal(_)
        ));
        assert!(matches!(
            classify_embedding_error(&RagError::ConfigError("bad".into())),
            QueryError::Internal(_)
        ));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(QueryOutcome::Answered.as_str(), "answered");
        assert_eq!(QueryOutcome::NoResults.as_str(), "no_results");
        assert_eq!(QueryOutcome::GenerationFailed(GenerationErrorKind::Timeout).as_str(), "generation_failed");
    }

    #[test]
    fn counters_average() {
        let counters = QueryCounters { queries: 4, processing_time: Duration::from_secs(2) };
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_queries_processed, 4);
        assert!((snapshot.average_processing_time_secs - 0.5).abs() < 1e-9);
        assert_eq!(QueryCounters::default().snapshot().average_processing_time_secs, 0.0);
    }
}
