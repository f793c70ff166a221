//! Health aggregation across the pipeline's dependencies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Component name of the document index.
pub const INDEX_COMPONENT: &str = "index";
/// Component name of the embedding provider.
pub const EMBEDDINGS_COMPONENT: &str = "embeddings";
/// Component name of the generation backend.
pub const GENERATION_COMPONENT: &str = "generation";

/// Components that must be present and healthy for the service to be ready.
pub const REQUIRED_COMPONENTS: [&str; 3] =
    [INDEX_COMPONENT, EMBEDDINGS_COMPONENT, GENERATION_COMPONENT];

/// Health of a single dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    /// Backend-specific diagnostics.
    pub details: Value,
    /// Human-readable reason when unhealthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>, details: Value) -> Self {
        Self { name: name.into(), healthy: true, details, error: None }
    }

    pub fn unhealthy(name: impl Into<String>, error: impl Into<String>, details: Value) -> Self {
        Self { name: name.into(), healthy: false, details, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// How partial failures are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthPolicy {
    /// Some components unhealthy is `degraded`; all unhealthy is `unhealthy`.
    #[default]
    DegradeOnPartialFailure,
    /// Any unhealthy component makes the service `unhealthy`.
    Strict,
}

/// Cumulative query counters at the time of a health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub total_queries_processed: u64,
    pub total_processing_time_secs: f64,
    pub average_processing_time_secs: f64,
}

/// Aggregated health of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// True only if every component is healthy.
    pub healthy: bool,
    pub components: Vec<ComponentHealth>,
    pub errors: Vec<String>,
    pub performance: PerformanceSnapshot,
}

impl HealthReport {
    /// Reduce component records to a report under `policy`.
    pub fn from_components(
        components: Vec<ComponentHealth>,
        policy: HealthPolicy,
        performance: PerformanceSnapshot,
    ) -> Self {
        let status = reduce(&components, policy);
        let healthy = components.iter().all(|c| c.healthy);
        let errors = components
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| match &c.error {
                Some(error) => format!("{}: {error}", c.name),
                None => format!("{} unhealthy", c.name),
            })
            .collect();
        Self { status, healthy, components, errors, performance }
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Every required dependency is present and healthy.
    pub fn is_ready(&self) -> bool {
        REQUIRED_COMPONENTS.iter().all(|name| self.component(name).is_some_and(|c| c.healthy))
    }
}

/// Overall status of a set of components.
pub fn reduce(components: &[ComponentHealth], policy: HealthPolicy) -> HealthStatus {
    let unhealthy = components.iter().filter(|c| !c.healthy).count();
    if unhealthy == 0 {
        return HealthStatus::Healthy;
    }
    match policy {
        HealthPolicy::Strict => HealthStatus::Unhealthy,
        HealthPolicy::DegradeOnPartialFailure if unhealthy == components.len() => {
            HealthStatus::Unhealthy
        }
        HealthPolicy::DegradeOnPartialFailure => HealthStatus::Degraded,
    }
}
