use std::sync::Arc;
use std::time::Duration;

use crate::memory::SharedMetricStorage;
use crate::metrics::{CHUNKS_RETRIEVED, LLM_TOKENS, Metrics, QUERIES};

#[test]
fn test_errors_are_tagged_by_type_and_subsystem() {
    let metrics = Metrics::new();

    metrics.record_error("timeout", "generation");
    metrics.record_error("timeout", "generation");
    metrics.record_error("network", "generation");
    metrics.record_error("timeout", "retrieval");

    let storage = metrics.storage();
    assert_eq!(storage.error_count("timeout", "generation"), 2);
    assert_eq!(storage.error_count("network", "generation"), 1);
    assert_eq!(storage.error_count("model_not_found", "generation"), 0);
    assert_eq!(storage.errors_for_subsystem("generation"), 3);
    assert_eq!(storage.errors_for_subsystem("retrieval"), 1);
}

#[test]
fn test_clones_share_storage() {
    let storage = Arc::new(SharedMetricStorage::new());
    let metrics = Metrics::with_storage(storage.clone());
    let clone = metrics.clone();

    clone.record_query("answered");
    metrics.record_query("answered");
    metrics.record_query("no_results");

    assert_eq!(storage.counter(QUERIES, &[("outcome", "answered")]), 2);
    assert_eq!(storage.counter_matching(QUERIES, &[]), 3);
}

#[test]
fn test_chunks_and_tokens_accumulate() {
    let metrics = Metrics::new();

    metrics.record_chunks_retrieved("vector", 3);
    metrics.record_chunks_retrieved("vector", 2);
    metrics.record_tokens("granite", "prompt", 120);
    metrics.record_tokens("granite", "completion", 0);

    let storage = metrics.storage();
    assert_eq!(storage.counter(CHUNKS_RETRIEVED, &[("search_type", "vector")]), 5);
    assert_eq!(storage.counter(LLM_TOKENS, &[("kind", "prompt"), ("model", "granite")]), 120);
    // zero-token reports are skipped entirely
    assert_eq!(storage.counter_matching(LLM_TOKENS, &[("kind", "completion")]), 0);
}

#[test]
fn test_stage_durations_are_summarised() {
    let metrics = Metrics::new();

    metrics.record_stage_duration("retrieval", Duration::from_millis(10));
    metrics.record_stage_duration("retrieval", Duration::from_millis(30));

    let summary = metrics.storage().duration("retrieval").unwrap();
    assert_eq!(summary.count, 2);
    assert!((summary.average_ms() - 20.0).abs() < 1e-6);
    assert!((summary.max_ms - 30.0).abs() < 1e-6);
    assert!(metrics.storage().duration("generation").is_none());
}
