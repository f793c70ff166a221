use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Identity of a counter series: metric name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> =
            labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        labels.sort();
        Self { name: name.to_string(), labels }
    }

    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels: Vec<String> = self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{{{}}}", self.name, labels.join(","))
    }
}

/// Running summary of observed durations for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurationSummary {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl DurationSummary {
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.total_ms / self.count as f64 }
    }
}

/// Point-in-time copy of everything in [`SharedMetricStorage`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Rendered series (`name{k=v,...}`) -> count
    pub counters: BTreeMap<String, u64>,
    /// Stage name -> duration summary
    pub durations: BTreeMap<String, DurationSummary>,
}

/// In-process mirror of the recorded metrics.
#[derive(Debug, Default)]
pub struct SharedMetricStorage {
    counters: RwLock<HashMap<MetricKey, u64>>,
    durations: RwLock<HashMap<String, DurationSummary>>,
}

impl SharedMetricStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key: MetricKey, by: u64) {
        if let Ok(mut counters) = self.counters.write() {
            *counters.entry(key).or_default() += by;
        }
    }

    pub fn observe(&self, stage: &str, millis: f64) {
        if let Ok(mut durations) = self.durations.write() {
            let summary = durations.entry(stage.to_string()).or_default();
            summary.count += 1;
            summary.total_ms += millis;
            if millis > summary.max_ms {
                summary.max_ms = millis;
            }
        }
    }

    /// Value of one exact series, 0 if never incremented.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().ok().and_then(|c| c.get(&key).copied()).unwrap_or(0)
    }

    /// Sum over every series of `name` whose labels include all of `filter`.
    pub fn counter_matching(&self, name: &str, filter: &[(&str, &str)]) -> u64 {
        let Ok(counters) = self.counters.read() else {
            return 0;
        };
        counters
            .iter()
            .filter(|(key, _)| key.name == name)
            .filter(|(key, _)| {
                filter.iter().all(|(k, v)| key.labels.iter().any(|(lk, lv)| lk == k && lv == v))
            })
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn error_count(&self, error_type: &str, subsystem: &str) -> u64 {
        self.counter(
            crate::metrics::ERRORS,
            &[("error_type", error_type), ("subsystem", subsystem)],
        )
    }

    pub fn errors_for_subsystem(&self, subsystem: &str) -> u64 {
        self.counter_matching(crate::metrics::ERRORS, &[("subsystem", subsystem)])
    }

    pub fn duration(&self, stage: &str) -> Option<DurationSummary> {
        self.durations.read().ok()?.get(stage).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .map(|c| c.iter().map(|(k, v)| (k.render(), *v)).collect())
            .unwrap_or_default();
        let durations = self
            .durations
            .read()
            .map(|d| d.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        MetricsSnapshot { counters, durations }
    }
}
