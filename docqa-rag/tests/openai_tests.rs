//! Embedding model client behaviour against a scripted HTTP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docqa_rag::{EmbeddingConfig, EmbeddingErrorKind, EmbeddingModel, OpenAIEmbeddingModel, RagError};
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
async fn spawn_backend<F>(script: F) -> (String, Arc<AtomicUsize>)
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

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn vectors_follow_input_order() {
    let (url, requests) = spawn_backend(|_, request_line: &str| {
        assert!(request_line.starts_with("POST /v1/embeddings"));
        Reply::ok(json!({ "data": [
            { "index": 1, "embedding": [0.0, 1.0] },
            { "index": 0, "embedding": [1.0, 0.0] },
        ]}))
    })
    .await;
    let model = OpenAIEmbeddingModel::new(&url, "all-MiniLM-L6-v2");

    let vectors = model.encode(&texts(&["first", "second"])).await.unwrap();

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_body_becomes_backend_error() {
    let (url, _) = spawn_backend(|_, _| {
        Reply::status(500, json!({ "error": { "message": "CUDA out of memory" } }))
    })
    .await;
    let model = OpenAIEmbeddingModel::new(&url, "all-MiniLM-L6-v2");

    let err = model.encode(&texts(&["question"])).await.unwrap_err();

    let RagError::EmbeddingError { kind, message, .. } = &err else {
        panic!("expected an embedding error, got {err:?}");
    };
    assert_eq!(*kind, EmbeddingErrorKind::Backend);
    assert!(message.contains("500"));
    assert!(message.contains("CUDA out of memory"));
}

#[tokio::test]
async fn slow_server_fails_within_configured_timeout() {
    let (url, _) = spawn_backend(|_, _| Reply {
        status: 200,
        body: json!({ "data": [] }),
        delay: Duration::from_secs(3),
    })
    .await;
    let config = EmbeddingConfig { url, timeout_secs: 1, ..EmbeddingConfig::default() };
    let model = OpenAIEmbeddingModel::from_config(&config).unwrap();

    let started = std::time::Instant::now();
    let err = model.encode(&texts(&["question"])).await.unwrap_err();

    assert!(matches!(err, RagError::EmbeddingError { kind: EmbeddingErrorKind::Backend, .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn empty_batch_makes_no_request() {
    let (url, requests) = spawn_backend(|_, _| Reply::ok(json!({ "data": [] }))).await;
    let model = OpenAIEmbeddingModel::new(&url, "all-MiniLM-L6-v2");

    assert!(model.encode(&[]).await.unwrap().is_empty());
    assert_eq!(requests.load(Ordering::SeqCst), 0);
}
