//! Chat completions client behaviour against a scripted HTTP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docqa_rag::{
    ChatCompletionsClient, GenerationClient, GenerationConfig, GenerationErrorKind,
    GenerationParams, RagError, TokenUsage,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const MODEL: &str = "granite-test";

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

fn config(url: String) -> GenerationConfig {
    GenerationConfig { url, model_name: MODEL.into(), timeout_secs: 1, max_retries: 2, ..GenerationConfig::default() }
}

fn client(config: &GenerationConfig) -> ChatCompletionsClient {
    ChatCompletionsClient::new(config).unwrap().with_retry_backoff(Duration::from_millis(5))
}

fn completion(text: &str) -> Value {
    json!({ "model": MODEL, "choices": [{ "message": { "role": "assistant", "content": text } }] })
}

#[tokio::test]
async fn missing_model_is_not_retried() {
    let (url, requests) = spawn_backend(|_, _| {
        Reply::status(404, json!({ "error": { "message": "The model `granite-test` does not exist." } }))
    })
    .await;
    let config = config(url);

    let err = client(&config)
        .generate("hello", &GenerationParams::from_config(&config))
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::GenerationError { kind: GenerationErrorKind::ModelNotFound, .. }));
    assert!(err.to_string().contains("does not exist"));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unavailable_backend_is_retried_until_success() {
    let (url, requests) = spawn_backend(|n, _| {
        if n == 0 {
            Reply::status(503, json!({ "message": "loading" }))
        } else {
            Reply::ok(completion("hi"))
        }
    })
    .await;
    let config = config(url);

    let result = client(&config).generate("hello", &GenerationParams::from_config(&config)).await.unwrap();

    assert_eq!(result.text, "hi");
    assert_eq!(result.model, MODEL);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slow_backend_times_out() {
    let (url, requests) = spawn_backend(|_, _| Reply {
        status: 200,
        body: completion("late"),
        delay: Duration::from_secs(3),
    })
    .await;
    let config = GenerationConfig { max_retries: 0, ..config(url) };

    let err = client(&config)
        .generate("hello", &GenerationParams::from_config(&config))
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::GenerationError { kind: GenerationErrorKind::Timeout, .. }));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn usage_is_reported_when_present() {
    let (url, _) = spawn_backend(|n, _| {
        let mut body = completion("answer");
        if n == 0 {
            body["usage"] = json!({ "prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17 });
        }
        Reply::ok(body)
    })
    .await;
    let config = config(url);
    let client = client(&config);
    let params = GenerationParams::from_config(&config);

    let with_usage = client.generate("hello", &params).await.unwrap();
    let without_usage = client.generate("hello", &params).await.unwrap();

    assert_eq!(
        with_usage.usage,
        TokenUsage { prompt_tokens: 12, completion_tokens: 5, total_tokens: 17 }
    );
    assert_eq!(without_usage.usage, TokenUsage::default());
}

#[tokio::test]
async fn health_requires_configured_model() {
    let (url, _) = spawn_backend(|_, request_line: &str| {
        assert!(request_line.starts_with("GET /v1/models"));
        Reply::ok(json!({ "object": "list", "data": [{ "id": "some-other-model" }] }))
    })
    .await;

    let health = client(&config(url)).check_health().await;

    assert!(!health.healthy);
    assert_eq!(health.details["connection_healthy"], true);
    assert_eq!(health.details["model_available"], false);
    assert_eq!(health.details["served_models"], json!(["some-other-model"]));
}

#[tokio::test]
async fn health_reports_served_model() {
    let (url, _) =
        spawn_backend(|_, _| Reply::ok(json!({ "data": [{ "id": "other" }, { "id": MODEL }] }))).await;

    let health = client(&config(url)).check_health().await;

    assert!(health.healthy);
    assert_eq!(health.details["model_name"], MODEL);
    assert_eq!(health.details["model_available"], true);
}
