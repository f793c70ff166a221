//! In-memory document index.
//!
//! [`InMemoryIndex`] scores chunks the same way the Elasticsearch queries do:
//! vector scores are `cosine + 1.0`, hybrid scoring only considers chunks
//! matching the text query, and keyword scores count term occurrences. It
//! is suitable for development, tests, and small corpora.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use crate::document::{MetadataFilters, RawHit, RetrievedChunk, SearchMode, SearchSpec};
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::health::{ComponentHealth, INDEX_COMPONENT};
use crate::index::{DocumentIndex, finalize_hits};

/// A chunk stored in an [`InMemoryIndex`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Stored fields, e.g. `filename`, `page_number`, `document_type`.
    pub fields: Map<String, Value>,
}

impl IndexedChunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        let id = id.into();
        let mut fields = Map::new();
        fields.insert("chunk_id".into(), Value::String(id.clone()));
        Self { id, text: text.into(), embedding, fields }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// An in-memory [`DocumentIndex`].
///
/// Chunks are stored by ID in a `HashMap` behind a `tokio::sync::RwLock`.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{InMemoryIndex, IndexedChunk};
///
/// let index = InMemoryIndex::new();
/// index.upsert(vec![IndexedChunk::new("c1", "text", embedding).with_field("filename", "a.pdf")]).await;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    chunks: RwLock<HashMap<String, IndexedChunk>>,
}

impl InMemoryIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace chunks by ID.
    pub async fn upsert(&self, chunks: impl IntoIterator<Item = IndexedChunk>) {
        let mut store = self.chunks.write().await;
        for chunk in chunks {
            store.insert(chunk.id.clone(), chunk);
        }
    }

    pub async fn delete(&self, ids: &[&str]) {
        let mut store = self.chunks.write().await;
        for id in ids {
            store.remove(*id);
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

fn matches_filters(fields: &Map<String, Value>, filters: &MetadataFilters) -> bool {
    filters.iter().all(|(field, expected)| match (fields.get(field), expected) {
        (Some(actual), Value::Array(any_of)) => any_of.contains(actual),
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    })
}

/// Occurrences of the query's terms in `text`, case-insensitive.
fn term_score(text: &str, query: &str) -> f32 {
    let haystack = text.to_lowercase();
    query
        .split_whitespace()
        .map(|term| haystack.matches(term.to_lowercase().as_str()).count())
        .sum::<usize>() as f32
}

#[async_trait]
impl DocumentIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn search(&self, spec: &SearchSpec, query_embedding: &[f32]) -> Result<Vec<RetrievedChunk>> {
        let store = self.chunks.read().await;

        let hits: Vec<RawHit> = store
            .values()
            .filter(|chunk| matches_filters(&chunk.fields, &spec.filters))
            .filter_map(|chunk| {
                let score = match &spec.mode {
                    SearchMode::Vector => cosine_similarity(&chunk.embedding, query_embedding) + 1.0,
                    SearchMode::Hybrid { text } => {
                        if term_score(&chunk.text, text) == 0.0 {
                            return None;
                        }
                        cosine_similarity(&chunk.embedding, query_embedding) + 1.0
                    }
                    SearchMode::Keyword { text } => {
                        let score = term_score(&chunk.text, text);
                        if score == 0.0 {
                            return None;
                        }
                        score
                    }
                };
                Some(RawHit { text: chunk.text.clone(), score, fields: chunk.fields.clone() })
            })
            .collect();

        Ok(finalize_hits(hits, spec))
    }

    async fn health(&self) -> ComponentHealth {
        let count = self.len().await;
        ComponentHealth::healthy(
            INDEX_COMPONENT,
            json!({ "connection_healthy": true, "backend": "in-memory", "index_document_count": count }),
        )
    }
}
