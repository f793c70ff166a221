//! Document index trait and the hit post-processing shared by its backends.

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::document::{RawHit, RetrievedChunk, SearchMode, SearchSpec};
use crate::error::Result;
use crate::health::ComponentHealth;

/// A searchable store of document chunks.
///
/// Implementations return chunks whose `score` is already normalized to
/// `[0, 1]`, at most `spec.top_k` of them, in descending score order.
/// [`finalize_hits`] does that post-processing for any backend.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Search according to `spec`. `query_embedding` is ignored by keyword search.
    async fn search(&self, spec: &SearchSpec, query_embedding: &[f32]) -> Result<Vec<RetrievedChunk>>;

    /// Lightweight status check. Never fails; problems are reported as an
    /// unhealthy record.
    async fn health(&self) -> ComponentHealth;
}

/// Drop hits below the raw-score threshold, order by raw score descending,
/// keep `top_k`, and normalize scores to `[0, 1]` for the search mode.
///
/// Vector and hybrid scores are `cosine + 1.0` and are halved. Keyword
/// (BM25) scores are divided by the best raw score in the result set.
pub fn finalize_hits(mut hits: Vec<RawHit>, spec: &SearchSpec) -> Vec<RetrievedChunk> {
    hits.retain(|h| h.score >= spec.similarity_threshold);
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(spec.top_k);

    let divisor = match spec.mode {
        SearchMode::Vector | SearchMode::Hybrid { .. } => 2.0,
        SearchMode::Keyword { .. } => hits.first().map(|h| h.score).unwrap_or(0.0),
    };

    hits.into_iter()
        .map(|hit| {
            let score = normalize(hit.score, divisor);
            RetrievedChunk::from_hit(hit, score)
        })
        .collect()
}

fn normalize(raw: f32, divisor: f32) -> f32 {
    if divisor <= 0.0 || !raw.is_finite() {
        return 0.0;
    }
    (raw / divisor).clamp(0.0, 1.0)
}
