//! # docqa-telemetry
//!
//! Logging and metrics shared by the docqa crates.
//!
//! - [`init_telemetry`] / [`init_json`] install a global `tracing` subscriber
//!   filtered by `RUST_LOG` (default `info`).
//! - [`Metrics`] records error, retrieval, token, query and stage-latency
//!   metrics through OpenTelemetry instruments and mirrors them in a
//!   [`SharedMetricStorage`] that can be inspected at runtime.
//!
//! ```rust,ignore
//! docqa_telemetry::init_telemetry("docqa-server")?;
//!
//! let metrics = docqa_telemetry::Metrics::new();
//! metrics.record_error("timeout", "generation");
//! assert_eq!(metrics.storage().error_count("timeout", "generation"), 1);
//! ```

mod memory;
mod metrics;

#[cfg(test)]
mod test_inmemory;
#[cfg(test)]
mod test_serialization;

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use memory::{DurationSummary, MetricKey, MetricsSnapshot, SharedMetricStorage};
pub use metrics::{
    CHUNKS_RETRIEVED, ERRORS, LLM_TOKENS, Metrics, QUERIES, STAGE_DURATION_MS,
};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed, or installation failed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),

    /// The requested log format is not recognised.
    #[error("unknown log format '{0}', expected 'pretty' or 'json'")]
    UnknownFormat(String),
}

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, coloured output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a human-readable subscriber.
pub fn init_telemetry(service_name: &str) -> Result<(), TelemetryError> {
    init_with_format(service_name, LogFormat::Pretty)
}

/// Install a JSON-lines subscriber.
pub fn init_json(service_name: &str) -> Result<(), TelemetryError> {
    init_with_format(service_name, LogFormat::Json)
}

/// Install the global subscriber in the given format.
///
/// # Errors
///
/// Returns [`TelemetryError::Init`] if a global subscriber is already set.
pub fn init_with_format(service_name: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let result = match format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .with_current_span(true)
            .flatten_event(true)
            .try_init(),
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(service.name = service_name, ?format, "telemetry initialized");
    Ok(())
}
