#[cfg(test)]
mod tests {
    use crate::metrics::Metrics;
    use std::time::Duration;

    #[test]
    fn test_snapshot_serialization() {
        let metrics = Metrics::new();
        metrics.record_error("timeout", "generation");
        metrics.record_stage_duration("embedding", Duration::from_millis(4));

        let json = serde_json::to_string_pretty(&metrics.storage().snapshot()).unwrap();

        assert!(json.contains("\"docqa.errors{error_type=timeout,subsystem=generation}\": 1"));
        assert!(json.contains("\"embedding\""));
        assert!(json.contains("\"total_ms\""));
    }
}
