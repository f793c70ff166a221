//! Elasticsearch client behaviour against a scripted HTTP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docqa_rag::document::{SearchMode, SearchSpec};
use docqa_rag::index::DocumentIndex;
use docqa_rag::{ElasticsearchIndex, IndexConfig, IndexErrorKind, RagError};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct Reply {
    status: u16,
    body: Value,
    delay: Duration,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body, delay: Duration::ZERO }
    }

    fn status(status: u16, body: Value) -> Self {
        Self { status, body, delay: Duration::ZERO }
    }
}

/// Serve one scripted reply per connection. The script gets the zero-based
/// request number and the request line.
async fn spawn_es<F>(script: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(usize, &str) -> Reply + Send + Sync + 'static,
{
    let script = Arc::new(script);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = requests.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let script = script.clone();
            tokio::spawn(async move {
                let head = read_request(&mut socket).await;
                let request_line = head.lines().next().unwrap_or_default().to_string();
                let reply = script(n, &request_line);
                tokio::time::sleep(reply.delay).await;
                let body = reply.body.to_string();
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    reply.status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), requests)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = socket.read(&mut chunk).await.unwrap_or(0);
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn client(url: String) -> ElasticsearchIndex {
    let config = IndexConfig { url, timeout_secs: 1, max_retries: 2, ..IndexConfig::default() };
    ElasticsearchIndex::new(config).unwrap().with_retry_backoff(Duration::from_millis(1))
}

fn hits() -> Value {
    json!({
        "hits": { "hits": [
            { "_score": 1.9, "_source": { "text": "best", "filename": "a.pdf", "chunk_id": 7, "page_number": 2 } },
            { "_score": 1.5, "_source": { "text": "second", "filename": "b.pdf" } },
            { "_score": 0.4, "_source": { "text": "weak", "filename": "c.pdf" } },
        ]}
    })
}

#[tokio::test]
async fn search_normalizes_and_thresholds_hits() {
    let (url, _) = spawn_es(|_, _| Reply::ok(hits())).await;
    let index = client(url);

    let chunks = index.search(&SearchSpec::vector(5, 0.7), &[0.1, 0.2]).await.unwrap();

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].document_name, "a.pdf");
    assert_eq!(chunks[0].chunk_id.as_deref(), Some("7"));
    assert_eq!(chunks[0].page_number, Some(2));
    assert!((chunks[0].score - 0.95).abs() < 1e-6);
    assert!((chunks[0].raw_score - 1.9).abs() < 1e-6);
    assert!(!chunks[0].metadata.contains_key("chunk_id"));
}

#[tokio::test]
async fn keyword_scores_are_relative_to_best_hit() {
    let (url, _) = spawn_es(|_, _| Reply::ok(hits())).await;
    let index = client(url);

    let spec = SearchSpec::vector(2, 0.0).with_mode(SearchMode::Keyword { text: "install".into() });
    let chunks = index.search(&spec, &[]).await.unwrap();

    assert_eq!(chunks.len(), 2);
    assert!((chunks[0].score - 1.0).abs() < 1e-6);
    assert!((chunks[1].score - 1.5 / 1.9).abs() < 1e-6);
}

#[tokio::test]
async fn timeouts_are_retried() {
    let (url, requests) = spawn_es(|n, _| {
        if n == 0 {
            Reply { status: 200, body: hits(), delay: Duration::from_secs(3) }
        } else {
            Reply::ok(hits())
        }
    })
    .await;
    let index = client(url);

    let chunks = index.search(&SearchSpec::vector(5, 0.0), &[1.0]).await.unwrap();

    assert_eq!(chunks.len(), 3);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_index_is_not_retried() {
    let (url, requests) = spawn_es(|_, _| {
        Reply::status(404, json!({ "error": { "type": "index_not_found_exception" }, "status": 404 }))
    })
    .await;
    let index = client(url);

    let err = index.search(&SearchSpec::vector(5, 0.0), &[1.0]).await.unwrap_err();

    assert!(matches!(err, RagError::IndexError { kind: IndexErrorKind::IndexNotFound, .. }));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_not_retried() {
    let (url, requests) = spawn_es(|_, _| Reply::status(500, json!({ "error": "boom" }))).await;
    let index = client(url);

    let err = index.search(&SearchSpec::vector(5, 0.0), &[1.0]).await.unwrap_err();

    assert!(matches!(err, RagError::IndexError { kind: IndexErrorKind::Backend, .. }));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_reports_cluster_and_index_stats() {
    let (url, _) = spawn_es(|_, request_line: &str| {
        if request_line.contains("_stats") {
            Reply::ok(json!({
                "indices": { "rag_documents": { "total": {
                    "docs": { "count": 42 },
                    "store": { "size_in_bytes": 1024 },
                }}}
            }))
        } else {
            Reply::ok(json!({ "cluster_name": "docs", "version": { "number": "8.11.0" } }))
        }
    })
    .await;
    let index = client(url);

    let health = index.health().await;

    assert!(health.healthy);
    assert_eq!(health.name, "index");
    assert_eq!(health.details["cluster_name"], "docs");
    assert_eq!(health.details["index_document_count"], 42);
}

#[tokio::test]
async fn health_makes_one_attempt_on_timeout() {
    let (url, requests) = spawn_es(|_, _| Reply {
        status: 200,
        body: json!({ "cluster_name": "docs" }),
        delay: Duration::from_secs(3),
    })
    .await;
    let config = IndexConfig {
        url,
        timeout_secs: 1,
        retry_on_timeout: true,
        max_retries: 3,
        ..IndexConfig::default()
    };
    let index = ElasticsearchIndex::new(config).unwrap().with_retry_backoff(Duration::from_millis(1));

    let started = std::time::Instant::now();
    let health = index.health().await;

    assert!(!health.healthy);
    assert_eq!(health.details["connection_healthy"], false);
    assert_eq!(health.details["error_type"], "timeout");
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_secs(3));

    assert!(!index.ping().await);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn validate_checks_embedding_dimension() {
    let (url, _) = spawn_es(|_, _| {
        Reply::ok(json!({
            "rag_documents": { "mappings": { "properties": {
                "text": { "type": "text" },
                "embedding": { "type": "dense_vector", "dims": 768 },
            }}}
        }))
    })
    .await;
    let index = client(url);

    let validation = index.validate().await;

    assert!(!validation.valid);
    assert_eq!(validation.vector_dimension, Some(768));
    assert!(validation.error.unwrap().contains("expected 384"));
}
