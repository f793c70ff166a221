//! Data types for search parameters, retrieved chunks, and response sources.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hard cap on the number of chunks a single query may retrieve.
pub const MAX_TOP_K: usize = 20;

/// Document name exposed when a hit carries no `filename`.
pub const UNKNOWN_DOCUMENT: &str = "Unknown";

/// Metadata keys that are surfaced as dedicated fields and never appear in
/// a chunk's `metadata` map.
pub const RESERVED_METADATA_KEYS: [&str; 3] = ["score", "chunk_id", "document_name"];

/// Which scoring strategy a search uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Vector,
    Hybrid,
    Keyword,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
            Self::Keyword => "keyword",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            "keyword" => Ok(Self::Keyword),
            other => Err(format!("search type must be vector, hybrid, or keyword (got '{other}')")),
        }
    }
}

/// A resolved search mode. Hybrid and keyword searches always carry the
/// free-text part of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode {
    Vector,
    Hybrid { text: String },
    Keyword { text: String },
}

impl SearchMode {
    pub fn search_type(&self) -> SearchType {
        match self {
            Self::Vector => SearchType::Vector,
            Self::Hybrid { .. } => SearchType::Hybrid,
            Self::Keyword { .. } => SearchType::Keyword,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Vector => None,
            Self::Hybrid { text } | Self::Keyword { text } => Some(text),
        }
    }
}

/// Field -> required value. An array value matches any of its elements;
/// every other value must match exactly. Predicates are ANDed across fields.
pub type MetadataFilters = BTreeMap<String, Value>;

/// Fully resolved retrieval parameters for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpec {
    /// Number of chunks to return, always within `1..=MAX_TOP_K`.
    pub top_k: usize,
    /// Minimum raw backend score a hit needs to be kept.
    pub similarity_threshold: f32,
    pub mode: SearchMode,
    pub filters: MetadataFilters,
}

impl SearchSpec {
    pub fn vector(top_k: usize, similarity_threshold: f32) -> Self {
        Self {
            top_k: top_k.clamp(1, MAX_TOP_K),
            similarity_threshold,
            mode: SearchMode::Vector,
            filters: MetadataFilters::new(),
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }
}

/// One hit as returned by a backend, before thresholding and normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub text: String,
    pub score: f32,
    /// Stored fields of the hit, restricted to the configured metadata fields.
    pub fields: Map<String, Value>,
}

/// A document chunk returned by retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    /// Relevance normalized to `[0, 1]`.
    pub score: f32,
    /// Score as reported by the backend.
    pub raw_score: f32,
    pub document_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Remaining stored fields, never containing [`RESERVED_METADATA_KEYS`].
    pub metadata: Map<String, Value>,
}

impl RetrievedChunk {
    /// Build a chunk from a backend hit and its normalized score.
    pub fn from_hit(hit: RawHit, score: f32) -> Self {
        let RawHit { text, score: raw_score, mut fields } = hit;

        let document_name = fields
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_DOCUMENT.to_string());
        let chunk_id = fields.get("chunk_id").and_then(value_to_id);
        let page_number =
            fields.get("page_number").and_then(Value::as_u64).and_then(|p| u32::try_from(p).ok());

        for key in RESERVED_METADATA_KEYS {
            fields.remove(key);
        }

        Self { text, score, raw_score, document_name, chunk_id, page_number, metadata: fields }
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A source document cited in a query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    /// Source document name.
    pub document: String,
    /// Text of the chunk used as context.
    pub chunk_text: String,
    /// Relevance score in `[0, 1]`.
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl From<&RetrievedChunk> for DocumentSource {
    fn from(chunk: &RetrievedChunk) -> Self {
        Self {
            document: chunk.document_name.clone(),
            chunk_text: chunk.text.clone(),
            score: chunk.score,
            metadata: chunk.metadata.clone(),
            chunk_id: chunk.chunk_id.clone(),
            page_number: chunk.page_number,
        }
    }
}
