//! Error types for the `docqa-rag` crate.

use std::fmt;

use thiserror::Error;

/// Why an embedding request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingErrorKind {
    /// The text was empty after preprocessing.
    EmptyInput,
    /// The provider has not been initialized.
    ModelNotLoaded,
    /// The embedding backend failed or could not be reached.
    Backend,
    /// The backend returned vectors of the wrong width.
    DimensionMismatch,
}

impl EmbeddingErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::ModelNotLoaded => "model_not_loaded",
            Self::Backend => "backend",
            Self::DimensionMismatch => "dimension_mismatch",
        }
    }
}

/// Why a document index call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// The request timed out.
    Timeout,
    /// The cluster could not be reached.
    Connection,
    /// The configured index does not exist.
    IndexNotFound,
    /// Any other failure reported by, or parsing a response from, the backend.
    Backend,
}

impl IndexErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::IndexNotFound => "index_not_found",
            Self::Backend => "backend",
        }
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }
}

/// Classified failure of a generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// The backend could not be reached.
    Network,
    /// The backend did not answer within the request timeout.
    Timeout,
    /// The requested model is not served by the backend.
    ModelNotFound,
    /// Anything else.
    Unknown,
}

impl GenerationErrorKind {
    /// Tag used for the `error_type` metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ModelNotFound => "model_not_found",
            Self::Unknown => "unknown",
        }
    }

    /// Safe answer text shown to the caller when generation fails.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network => {
                "I'm having trouble reaching the language model service right now. Please try again later."
            }
            Self::Timeout => {
                "The language model took too long to respond. Please try again later or ask a shorter question."
            }
            Self::ModelNotFound => {
                "The requested language model is not available. Please check the model name and try again."
            }
            Self::Unknown => {
                "I encountered an error while generating an answer to your question. Please try again later."
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }
}

macro_rules! display_as_str {
    ($($kind:ty),*) => {
        $(impl fmt::Display for $kind {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(EmbeddingErrorKind, IndexErrorKind, GenerationErrorKind);

/// Errors that can occur in retrieval and generation.
#[derive(Debug, Error)]
pub enum RagError {
    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}, {kind}): {message}")]
    EmbeddingError {
        /// The embedding model that produced the error.
        provider: String,
        kind: EmbeddingErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the document index backend.
    #[error("Index error ({backend}, {kind}): {message}")]
    IndexError {
        /// The index backend that produced the error.
        backend: String,
        kind: IndexErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred calling the generation backend.
    #[error("Generation error ({backend}, {kind}): {message}")]
    GenerationError {
        /// The generation backend that produced the error.
        backend: String,
        kind: GenerationErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Short classification used as the `error_type` metric label.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::EmbeddingError { kind, .. } => kind.as_str(),
            Self::IndexError { kind, .. } => kind.as_str(),
            Self::GenerationError { kind, .. } => kind.as_str(),
            Self::ConfigError(_) => "config",
        }
    }
}

/// A convenience result type for retrieval and generation operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Why a query could not be answered at all.
///
/// Failures that still yield an answer (no results, generation failure) are
/// not errors; they come back as a normal response.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The question or its overrides are invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A backend needed to answer is unreachable.
    #[error("Dependency unavailable ({dependency}): {message}")]
    DependencyUnavailable {
        /// Component name, e.g. `embeddings`.
        dependency: &'static str,
        message: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
