//! [`DocumentIndex`] backed by the Elasticsearch REST API.
//!
//! Queries are plain JSON bodies sent with `reqwest`. Vector scoring uses a
//! `script_score` with `cosineSimilarity(...) + 1.0`, so raw vector and hybrid
//! scores fall in `[0, 2]`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::config::IndexConfig;
use crate::document::{MetadataFilters, RawHit, RetrievedChunk, SearchMode, SearchSpec};
use crate::error::{IndexErrorKind, RagError, Result};
use crate::health::{ComponentHealth, INDEX_COMPONENT};
use crate::index::{DocumentIndex, finalize_hits};

const BACKEND: &str = "elasticsearch";

/// Document count and on-disk size of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub document_count: u64,
    pub store_size_bytes: u64,
}

/// Result of [`ElasticsearchIndex::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexValidation {
    pub valid: bool,
    pub index_name: String,
    pub embedding_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_dimension: Option<u64>,
    pub mapping_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct SearchCounters {
    searches: u64,
    results: u64,
    total_time: Duration,
}

/// Elasticsearch document index client.
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    config: IndexConfig,
    base_url: String,
    retry_backoff: Duration,
    counters: Mutex<SearchCounters>,
}

impl ElasticsearchIndex {
    /// Create a client for the configured cluster and index.
    ///
    /// No request is made; use [`validate`](Self::validate) or
    /// [`ping`](Self::ping) to check connectivity.
    pub fn new(config: IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build Elasticsearch client: {e}")))?;
        let base_url = config.url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            config,
            base_url,
            retry_backoff: Duration::from_millis(250),
            counters: Mutex::new(SearchCounters::default()),
        })
    }

    /// Base delay between retries; attempt `n` waits `n * backoff`.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Build the `_search` body for `spec`.
    pub fn build_query(&self, spec: &SearchSpec, query_embedding: &[f32]) -> Value {
        let text_query = |text: &str| {
            json!({
                "multi_match": {
                    "query": text,
                    "fields": [self.config.text_field, "title^2"],
                    "type": "best_fields",
                    "fuzziness": "AUTO",
                }
            })
        };
        let filters = filter_clauses(&spec.filters);

        let query = match &spec.mode {
            SearchMode::Vector => {
                let inner = if filters.is_empty() {
                    json!({ "match_all": {} })
                } else {
                    json!({ "bool": { "filter": filters } })
                };
                self.script_score(inner, query_embedding)
            }
            SearchMode::Hybrid { text } => {
                self.script_score(with_filters(text_query(text.as_str()), filters), query_embedding)
            }
            SearchMode::Keyword { text } => with_filters(text_query(text.as_str()), filters),
        };

        let mut includes = vec![self.config.text_field.clone()];
        includes.extend(self.config.metadata_fields.iter().cloned());

        json!({
            "size": spec.top_k,
            "query": query,
            "_source": { "includes": includes },
        })
    }

    fn script_score(&self, inner: Value, query_embedding: &[f32]) -> Value {
        json!({
            "script_score": {
                "query": inner,
                "script": {
                    "source": format!(
                        "cosineSimilarity(params.query_vector, '{}') + 1.0",
                        self.config.embedding_field
                    ),
                    "params": { "query_vector": query_embedding },
                }
            }
        })
    }

    /// `true` if the cluster answers its root endpoint. Makes one attempt.
    pub async fn ping(&self) -> bool {
        self.request_once(Method::GET, "/", None).await.is_ok()
    }

    /// Document count and store size of the configured index.
    pub async fn stats(&self) -> Result<IndexStats> {
        let path = format!("/{}/_stats", self.config.index_name);
        let body = self.request_once(Method::GET, &path, None).await?;
        let total = &body["indices"][&self.config.index_name]["total"];
        Ok(IndexStats {
            document_count: total["docs"]["count"].as_u64().unwrap_or(0),
            store_size_bytes: total["store"]["size_in_bytes"].as_u64().unwrap_or(0),
        })
    }

    /// Check that the index exists and that its mapping has the embedding
    /// field with the configured dimension.
    pub async fn validate(&self) -> IndexValidation {
        let mut validation = IndexValidation {
            index_name: self.config.index_name.clone(),
            embedding_field: self.config.embedding_field.clone(),
            ..IndexValidation::default()
        };

        let path = format!("/{}/_mapping", self.config.index_name);
        let mapping = match self.request_once(Method::GET, &path, None).await {
            Ok(mapping) => mapping,
            Err(RagError::IndexError { kind: IndexErrorKind::IndexNotFound, .. }) => {
                validation.error = Some(format!("Index {} does not exist", self.config.index_name));
                return validation;
            }
            Err(e) => {
                error!(error = %e, "index validation failed");
                validation.error = Some(e.to_string());
                return validation;
            }
        };

        let properties = mapping[&self.config.index_name]["mappings"]["properties"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        validation.mapping_fields = properties.keys().cloned().collect();

        let Some(embedding) = properties.get(&self.config.embedding_field) else {
            validation.error = Some(format!(
                "Embedding field '{}' not found in mapping",
                self.config.embedding_field
            ));
            return validation;
        };

        let dims = embedding["dims"].as_u64();
        validation.vector_dimension = dims;
        if dims != Some(self.config.vector_dimension as u64) {
            validation.error = Some(format!(
                "Vector dimension mismatch: expected {}, got {}",
                self.config.vector_dimension,
                dims.map(|d| d.to_string()).unwrap_or_else(|| "none".into())
            ));
            return validation;
        }

        validation.valid = true;
        validation
    }

    /// Single attempt, for status checks that must answer within one timeout.
    async fn request_once(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        self.send_once(method, &url, body)
            .await
            .map_err(|(kind, message)| RagError::IndexError { backend: BACKEND.into(), kind, message })
    }

    /// Retries transport failures when `retry_on_timeout` is set.
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0u32;
        loop {
            match self.send_once(method.clone(), &url, body).await {
                Ok(value) => return Ok(value),
                Err((kind, message)) => {
                    let retry = self.config.retry_on_timeout
                        && kind.is_retryable()
                        && attempt < self.config.max_retries;
                    if !retry {
                        return Err(RagError::IndexError { backend: BACKEND.into(), kind, message });
                    }
                    attempt += 1;
                    warn!(%kind, attempt, max_retries = self.config.max_retries, "retrying Elasticsearch request");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> std::result::Result<Value, (IndexErrorKind, String)> {
        let mut request = self.client.request(method, url);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| (classify_transport(&e), e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| (classify_transport(&e), e.to_string()))?;

        if !status.is_success() {
            let kind = if status == StatusCode::NOT_FOUND && text.contains("index_not_found_exception") {
                IndexErrorKind::IndexNotFound
            } else {
                IndexErrorKind::Backend
            };
            return Err((kind, format!("status {status}: {}", truncate(&text, 300))));
        }

        serde_json::from_str(&text)
            .map_err(|e| (IndexErrorKind::Backend, format!("malformed response: {e}")))
    }

    fn parse_hits(&self, response: &Value) -> Result<Vec<RawHit>> {
        let hits = response["hits"]["hits"].as_array().ok_or_else(|| RagError::IndexError {
            backend: BACKEND.into(),
            kind: IndexErrorKind::Backend,
            message: "response has no hits array".into(),
        })?;

        Ok(hits
            .iter()
            .map(|hit| {
                let source = hit["_source"].as_object().cloned().unwrap_or_default();
                let text = source
                    .get(&self.config.text_field)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let fields: Map<String, Value> = self
                    .config
                    .metadata_fields
                    .iter()
                    .filter_map(|f| source.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                RawHit { text, score: hit["_score"].as_f64().unwrap_or(0.0) as f32, fields }
            })
            .collect())
    }
}

fn filter_clauses(filters: &MetadataFilters) -> Vec<Value> {
    filters
        .iter()
        .map(|(field, value)| match value {
            Value::Array(values) => json!({ "terms": { field: values } }),
            other => json!({ "term": { field: other } }),
        })
        .collect()
}

fn with_filters(must: Value, filters: Vec<Value>) -> Value {
    if filters.is_empty() { must } else { json!({ "bool": { "must": must, "filter": filters } }) }
}

fn classify_transport(e: &reqwest::Error) -> IndexErrorKind {
    if e.is_timeout() {
        IndexErrorKind::Timeout
    } else if e.is_connect() {
        IndexErrorKind::Connection
    } else {
        IndexErrorKind::Backend
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

#[async_trait]
impl DocumentIndex for ElasticsearchIndex {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn search(&self, spec: &SearchSpec, query_embedding: &[f32]) -> Result<Vec<RetrievedChunk>> {
        let started = Instant::now();
        let body = self.build_query(spec, query_embedding);
        let path = format!("/{}/_search", self.config.index_name);

        let response = self.request(Method::POST, &path, Some(&body)).await.inspect_err(|e| {
            error!(index = %self.config.index_name, error = %e, "Elasticsearch search failed");
        })?;
        let hits = self.parse_hits(&response)?;
        let total_hits = hits.len();
        let chunks = finalize_hits(hits, spec);

        let elapsed = started.elapsed();
        if let Ok(mut counters) = self.counters.lock() {
            counters.searches += 1;
            counters.results += chunks.len() as u64;
            counters.total_time += elapsed;
        }

        debug!(
            search_type = %spec.mode.search_type(),
            total_hits,
            kept = chunks.len(),
            top_score = chunks.first().map(|c| c.score).unwrap_or(0.0),
            elapsed_ms = elapsed.as_millis() as u64,
            "search completed"
        );
        Ok(chunks)
    }

    async fn health(&self) -> ComponentHealth {
        let (searches, results, total_time) = self
            .counters
            .lock()
            .map(|c| (c.searches, c.results, c.total_time))
            .unwrap_or_default();
        let average_search_ms =
            if searches > 0 { total_time.as_secs_f64() * 1000.0 / searches as f64 } else { 0.0 };

        let info = match self.request_once(Method::GET, "/", None).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Elasticsearch health check failed");
                return ComponentHealth::unhealthy(
                    INDEX_COMPONENT,
                    "index connection unhealthy",
                    json!({ "connection_healthy": false, "error_type": e.error_type() }),
                );
            }
        };

        let mut details = json!({
            "connection_healthy": true,
            "backend": BACKEND,
            "cluster_name": info["cluster_name"],
            "elasticsearch_version": info["version"]["number"],
            "index_name": self.config.index_name,
            "total_searches": searches,
            "total_results": results,
            "average_search_time_ms": average_search_ms,
        });

        match self.stats().await {
            Ok(stats) => {
                details["index_document_count"] = json!(stats.document_count);
                details["index_size_bytes"] = json!(stats.store_size_bytes);
                info!(documents = stats.document_count, "Elasticsearch healthy");
                ComponentHealth::healthy(INDEX_COMPONENT, details)
            }
            Err(e) => {
                details["error_type"] = json!(e.error_type());
                let reason = format!("index stats unavailable: {}", e.error_type());
                ComponentHealth::unhealthy(INDEX_COMPONENT, reason, details)
            }
        }
    }
}
