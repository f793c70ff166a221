//! # docqa-rag
//!
//! Question answering over an Elasticsearch document index.
//!
//! A [`QueryPipeline`] embeds the question with an [`EmbeddingProvider`],
//! retrieves chunks from a [`DocumentIndex`], fills a prompt, and asks a
//! [`GenerationClient`] for the answer. [`HealthReport`] aggregates the
//! health of all three dependencies.
//!
//! Backends:
//! - [`OpenAIEmbeddingModel`]: OpenAI-compatible `/v1/embeddings`
//! - [`ElasticsearchIndex`]: vector, hybrid, and keyword search over REST
//! - [`InMemoryIndex`]: local index with the same scoring, for tests
//! - [`ChatCompletionsClient`]: OpenAI-compatible `/v1/chat/completions` (vLLM)

pub mod completions;
pub mod config;
pub mod document;
pub mod elasticsearch;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod health;
pub mod index;
pub mod inmemory;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod response;
pub mod retrieval;

pub use completions::ChatCompletionsClient;
pub use config::{
    AppConfig, Device, EmbeddingConfig, GenerationConfig, IndexConfig, ResponseConfig,
    RetrievalConfig, RetrievalConfigBuilder,
};
pub use document::{
    DocumentSource, MAX_TOP_K, MetadataFilters, RetrievedChunk, SearchMode, SearchSpec, SearchType,
};
pub use elasticsearch::{ElasticsearchIndex, IndexStats, IndexValidation};
pub use embedding::{EmbeddingModel, EmbeddingProvider};
pub use error::{
    EmbeddingErrorKind, GenerationErrorKind, IndexErrorKind, QueryError, RagError, Result,
};
pub use generation::{
    GenerationClient, GenerationParams, GenerationResult, LlmOverrides, TokenUsage,
};
pub use health::{ComponentHealth, HealthPolicy, HealthReport, HealthStatus, PerformanceSnapshot};
pub use index::DocumentIndex;
pub use inmemory::{InMemoryIndex, IndexedChunk};
pub use openai::OpenAIEmbeddingModel;
pub use pipeline::{
    ModelInfo, PipelineInfo, PipelineSettings, QueryOutcome, QueryPipeline, QueryPipelineBuilder,
};
pub use response::{NO_RESULTS_ANSWER, QueryMetadata, QueryResponse};
pub use retrieval::{RetrievalOverrides, Retriever};
