//! Metric instruments for the query pipeline.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Unit};

use crate::memory::{MetricKey, SharedMetricStorage};

pub const ERRORS: &str = "docqa.errors";
pub const CHUNKS_RETRIEVED: &str = "docqa.chunks_retrieved";
pub const LLM_TOKENS: &str = "docqa.llm_tokens";
pub const QUERIES: &str = "docqa.queries";
pub const STAGE_DURATION_MS: &str = "docqa.stage_duration_ms";

/// Records pipeline metrics.
///
/// Every call goes to an OpenTelemetry instrument obtained from the global
/// meter (a no-op until the host installs a meter provider) and to the
/// in-memory [`SharedMetricStorage`], which backs diagnostics and tests.
/// Cloning is cheap; clones share storage.
#[derive(Clone)]
pub struct Metrics {
    storage: Arc<SharedMetricStorage>,
    errors: Counter<u64>,
    chunks_retrieved: Counter<u64>,
    llm_tokens: Counter<u64>,
    queries: Counter<u64>,
    stage_duration: Histogram<f64>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("storage", &self.storage).finish_non_exhaustive()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(SharedMetricStorage::new()))
    }

    pub fn with_storage(storage: Arc<SharedMetricStorage>) -> Self {
        let meter = global::meter("docqa");
        Self {
            storage,
            errors: meter
                .u64_counter(ERRORS)
                .with_description("Errors by classified type and subsystem")
                .init(),
            chunks_retrieved: meter
                .u64_counter(CHUNKS_RETRIEVED)
                .with_description("Chunks returned by retrieval")
                .init(),
            llm_tokens: meter
                .u64_counter(LLM_TOKENS)
                .with_description("Tokens reported by the generation backend")
                .init(),
            queries: meter
                .u64_counter(QUERIES)
                .with_description("Completed queries by outcome")
                .init(),
            stage_duration: meter
                .f64_histogram(STAGE_DURATION_MS)
                .with_description("Elapsed time per pipeline stage")
                .with_unit(Unit::new("ms"))
                .init(),
        }
    }

    pub fn storage(&self) -> &Arc<SharedMetricStorage> {
        &self.storage
    }

    /// Record one error, tagged by its classified type and the subsystem it came from.
    pub fn record_error(&self, error_type: &str, subsystem: &str) {
        self.errors.add(
            1,
            &[
                KeyValue::new("error_type", error_type.to_string()),
                KeyValue::new("subsystem", subsystem.to_string()),
            ],
        );
        self.storage.increment(
            MetricKey::new(ERRORS, &[("error_type", error_type), ("subsystem", subsystem)]),
            1,
        );
    }

    pub fn record_chunks_retrieved(&self, search_type: &str, count: usize) {
        let count = count as u64;
        self.chunks_retrieved
            .add(count, &[KeyValue::new("search_type", search_type.to_string())]);
        self.storage.increment(MetricKey::new(CHUNKS_RETRIEVED, &[("search_type", search_type)]), count);
    }

    /// `kind` is `prompt` or `completion`.
    pub fn record_tokens(&self, model: &str, kind: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.llm_tokens.add(
            count,
            &[KeyValue::new("model", model.to_string()), KeyValue::new("kind", kind.to_string())],
        );
        self.storage.increment(MetricKey::new(LLM_TOKENS, &[("model", model), ("kind", kind)]), count);
    }

    pub fn record_query(&self, outcome: &str) {
        self.queries.add(1, &[KeyValue::new("outcome", outcome.to_string())]);
        self.storage.increment(MetricKey::new(QUERIES, &[("outcome", outcome)]), 1);
    }

    pub fn record_stage_duration(&self, stage: &str, elapsed: Duration) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        self.stage_duration.record(millis, &[KeyValue::new("stage", stage.to_string())]);
        self.storage.observe(stage, millis);
    }
}
