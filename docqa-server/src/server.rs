use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use chrono::Utc;
use docqa_rag::{LlmOverrides, QueryPipeline, QueryResponse, RetrievalOverrides};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::correlation::correlation_id;
use crate::error::ApiError;

pub const SERVICE_NAME: &str = "docqa-server";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QueryPipeline>,
}

impl AppState {
    pub fn new(pipeline: QueryPipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000, request_timeout: Duration::from_secs(300) }
    }
}

/// Body of `POST /api/v1/query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub llm_params: Option<LlmOverrides>,
    #[serde(default)]
    pub retrieval_params: Option<RetrievalOverrides>,
    /// Ignored when sources are disabled in configuration.
    #[serde(default = "enabled")]
    pub include_sources: bool,
    /// Ignored when metadata is disabled in configuration.
    #[serde(default = "enabled")]
    pub include_metadata: bool,
}

fn enabled() -> bool {
    true
}

pub fn app_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api = Router::new()
        .route("/query", post(query))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/info", get(service_info))
        .route("/models", get(models));

    Router::new()
        .nest("/api/v1", api)
        .fallback(not_found)
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(correlation_id))
}

pub async fn run_server(config: ServerConfig, pipeline: QueryPipeline) -> anyhow::Result<()> {
    let app = app_router(AppState::new(pipeline), config.request_timeout);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid host/port {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "{SERVICE_NAME} listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("{SERVICE_NAME} stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        state.pipeline.metrics().record_error("validation", "api");
        ApiError::InvalidRequest(rejection.body_text())
    })?;

    let response = state
        .pipeline
        .answer_query(&request.question, request.llm_params.as_ref(), request.retrieval_params.as_ref())
        .await
        .map_err(|e| {
            warn!(error = %e, "query failed");
            ApiError::from(e)
        })?;

    Ok(Json(response.restrict(request.include_sources, request.include_metadata)))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION,
        "service": SERVICE_NAME,
    }))
}

async fn ready(State(state): State<AppState>) -> Response {
    let report = state.pipeline.health().await;
    let timestamp = Utc::now().to_rfc3339();

    if report.is_ready() {
        let body = json!({
            "status": "ready",
            "health_status": report.status,
            "timestamp": timestamp,
            "components": report.components,
            "performance": report.performance,
        });
        (StatusCode::OK, Json(body)).into_response()
    } else {
        warn!(errors = ?report.errors, "service not ready");
        let body = json!({
            "status": "not_ready",
            "health_status": report.status,
            "timestamp": timestamp,
            "errors": report.errors,
            "components": report.components,
        });
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "pipeline": state.pipeline.info(),
    }))
}

async fn models(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.models())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found" })))
}
