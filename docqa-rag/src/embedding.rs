//! Query embedding: text preprocessing, bounded access to the model, and
//! dimension checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingErrorKind, RagError, Result};
use crate::health::{ComponentHealth, EMBEDDINGS_COMPONENT};

/// Maximum characters kept by [`preprocess_text`].
pub const MAX_INPUT_CHARS: usize = 512;

const DIMENSION_PROBE: &str = "This is a test sentence for dimension validation.";
const WARM_UP_TEXTS: [&str; 3] = [
    "This is a warm-up sentence for the embedding model.",
    "Another warm-up sentence to optimize performance.",
    "Final warm-up sentence for model optimization.",
];

/// A backend that turns texts into vectors.
///
/// Implementations only encode. Preprocessing, batching, normalization and
/// dimension checks are done by [`EmbeddingProvider`].
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Name of the model served by the backend.
    fn model_name(&self) -> &str;

    /// Encode each text to a vector, in input order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Normalize text the same way the ingestion pipeline does: trim, collapse
/// whitespace runs to one space, keep at most [`MAX_INPUT_CHARS`] characters.
pub fn preprocess_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX_INPUT_CHARS) {
        Some((cut, _)) => collapsed[..cut].to_string(),
        None => collapsed,
    }
}

/// Cosine similarity of two vectors. Returns 0.0 for zero-magnitude or
/// mismatched-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Result of [`EmbeddingProvider::validate_consistency`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct EmbeddingStats {
    embeddings_generated: u64,
    total_time: Duration,
}

/// Produces query embeddings of a fixed dimension from an [`EmbeddingModel`].
///
/// The provider must be [`initialize`](Self::initialize)d before use. Calls
/// into the model are bounded by `max_concurrency` permits, so a backend
/// that cannot serve parallel requests can be serialised with a value of 1.
pub struct EmbeddingProvider {
    model: Arc<dyn EmbeddingModel>,
    config: EmbeddingConfig,
    dimension: usize,
    permits: Semaphore,
    loaded: AtomicBool,
    stats: Mutex<EmbeddingStats>,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("model", &self.model.model_name())
            .field("dimension", &self.dimension)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl EmbeddingProvider {
    pub fn new(model: Arc<dyn EmbeddingModel>, config: EmbeddingConfig, dimension: usize) -> Self {
        let permits = Semaphore::new(config.max_concurrency.max(1));
        Self {
            model,
            config,
            dimension,
            permits,
            loaded: AtomicBool::new(false),
            stats: Mutex::new(EmbeddingStats::default()),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Check the model's output dimension and warm it up.
    ///
    /// # Errors
    ///
    /// Fails if the probe cannot be encoded or its width differs from the
    /// configured dimension. Warm-up failures are only logged.
    pub async fn initialize(&self) -> Result<()> {
        info!(model = %self.model_name(), device = %self.config.device, "initializing embedding model");

        let probe = self.encode_bounded(vec![DIMENSION_PROBE.to_string()]).await?;
        let actual = probe.first().map(Vec::len).unwrap_or(0);
        if actual != self.dimension {
            error!(expected = self.dimension, actual, "embedding dimension mismatch");
            return Err(self.error(
                EmbeddingErrorKind::DimensionMismatch,
                format!("expected dimension {}, model produced {actual}", self.dimension),
            ));
        }

        let warm_up: Vec<String> = WARM_UP_TEXTS.iter().map(|s| s.to_string()).collect();
        match self.encode_bounded(warm_up).await {
            Ok(_) => debug!(num_texts = WARM_UP_TEXTS.len(), "model warm-up completed"),
            Err(e) => warn!(error = %e, "model warm-up failed"),
        }

        self.loaded.store(true, Ordering::Release);
        info!(model = %self.model_name(), dimension = self.dimension, "embedding model ready");
        Ok(())
    }

    /// Embed a single query.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.ensure_loaded()?;
        let processed = preprocess_text(text);
        if processed.is_empty() {
            return Err(self.error(EmbeddingErrorKind::EmptyInput, "text is empty after preprocessing"));
        }

        let started = Instant::now();
        let mut vectors = self.encode_checked(vec![processed]).await?;
        self.record(1, started.elapsed());

        vectors.pop().ok_or_else(|| self.error(EmbeddingErrorKind::Backend, "model returned no vectors"))
    }

    /// Embed many texts, split into `batch_size` requests.
    ///
    /// # Errors
    ///
    /// Fails with [`EmbeddingErrorKind::EmptyInput`] if any text is empty
    /// after preprocessing, or with the first backend failure.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.ensure_loaded()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let processed: Vec<String> = texts.iter().map(|t| preprocess_text(t)).collect();
        if let Some(position) = processed.iter().position(String::is_empty) {
            return Err(self.error(
                EmbeddingErrorKind::EmptyInput,
                format!("text at position {position} is empty after preprocessing"),
            ));
        }

        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let batches = processed.chunks(batch_size).map(|batch| self.encode_checked(batch.to_vec()));
        let vectors: Vec<Vec<f32>> = try_join_all(batches).await?.into_iter().flatten().collect();
        self.record(vectors.len() as u64, started.elapsed());

        debug!(count = vectors.len(), batch_size, "embedded batch");
        Ok(vectors)
    }

    /// Self-test of dimension, preprocessing, and similarity.
    pub async fn validate_consistency(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        let mut check = |passed: bool, error: String| {
            if passed {
                report.tests_passed += 1;
            } else {
                report.tests_failed += 1;
                report.errors.push(error);
            }
        };

        if self.is_loaded() {
            match self.embed("Test sentence for consistency validation.").await {
                Ok(v) => check(v.len() == self.dimension, "Dimension inconsistency".into()),
                Err(e) => check(false, format!("Validation error: {e}")),
            }
        }

        let processed = preprocess_text("  This   is   a   test   with   extra   spaces  ");
        check(processed == "This is a test with extra spaces", "Preprocessing inconsistency".into());

        if self.is_loaded() {
            match (self.embed("Hello world").await, self.embed("Hello world").await) {
                (Ok(a), Ok(b)) => {
                    let similarity = cosine_similarity(&a, &b);
                    check(
                        (0.9..=1.0 + 1e-5).contains(&similarity),
                        "Similarity computation issue".into(),
                    );
                }
                (Err(e), _) | (_, Err(e)) => check(false, format!("Validation error: {e}")),
            }
        }

        info!(
            tests_passed = report.tests_passed,
            tests_failed = report.tests_failed,
            "consistency validation completed"
        );
        report
    }

    /// Health record for the aggregator. Healthy once the model is loaded.
    pub fn health(&self) -> ComponentHealth {
        let (generated, total) = self
            .stats
            .lock()
            .map(|s| (s.embeddings_generated, s.total_time))
            .unwrap_or_default();
        let average_ms =
            if generated > 0 { total.as_secs_f64() * 1000.0 / generated as f64 } else { 0.0 };

        let details = json!({
            "model_loaded": self.is_loaded(),
            "model_name": self.model_name(),
            "device": self.config.device,
            "vector_dimension": self.dimension,
            "total_embeddings_generated": generated,
            "total_processing_time_ms": total.as_secs_f64() * 1000.0,
            "average_processing_time_ms": average_ms,
        });

        if self.is_loaded() {
            ComponentHealth::healthy(EMBEDDINGS_COMPONENT, details)
        } else {
            ComponentHealth::unhealthy(EMBEDDINGS_COMPONENT, "Embedding model not loaded", details)
        }
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(self.error(EmbeddingErrorKind::ModelNotLoaded, "embedding model not initialized"))
        }
    }

    async fn encode_bounded(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| self.error(EmbeddingErrorKind::Backend, format!("semaphore error: {e}")))?;
        self.model.encode(&texts).await
    }

    async fn encode_checked(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let mut vectors = self.encode_bounded(texts).await.inspect_err(|e| {
            error!(model = %self.model_name(), error = %e, "embedding request failed");
        })?;

        if vectors.len() != expected {
            return Err(self.error(
                EmbeddingErrorKind::Backend,
                format!("model returned {} vectors for {expected} inputs", vectors.len()),
            ));
        }
        for v in &mut vectors {
            if v.len() != self.dimension {
                return Err(self.error(
                    EmbeddingErrorKind::DimensionMismatch,
                    format!("expected dimension {}, got {}", self.dimension, v.len()),
                ));
            }
            if self.config.normalize_embeddings {
                l2_normalize(v);
            }
        }
        Ok(vectors)
    }

    fn record(&self, count: u64, elapsed: Duration) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.embeddings_generated += count;
            stats.total_time += elapsed;
        }
    }

    fn error(&self, kind: EmbeddingErrorKind, message: impl Into<String>) -> RagError {
        RagError::EmbeddingError { provider: self.model_name().to_string(), kind, message: message.into() }
    }
}
