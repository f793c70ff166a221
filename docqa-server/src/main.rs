use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use docqa_rag::{
    AppConfig, ChatCompletionsClient, ElasticsearchIndex, EmbeddingProvider, HealthPolicy,
    OpenAIEmbeddingModel, QueryPipeline,
};
use docqa_server::{SERVICE_NAME, ServerConfig, run_server};
use docqa_telemetry::{LogFormat, Metrics};
use tracing::{info, warn};

/// Question answering over an Elasticsearch document index.
///
/// Backend settings are read from `ES_*`, `VLLM_*`, `EMBEDDING_*` and
/// `RAG_*` environment variables.
#[derive(Debug, Parser)]
#[command(name = "docqa-server", version, about)]
struct Args {
    /// Address to bind.
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "API_PORT", default_value_t = 8000)]
    port: u16,

    /// Requests running longer than this are answered with 408.
    #[arg(long, env = "API_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    request_timeout_secs: u64,

    /// `pretty` or `json`.
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Report any unhealthy dependency as `unhealthy` instead of `degraded`.
    #[arg(long, env = "HEALTH_STRICT")]
    strict_health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    docqa_telemetry::init_with_format(SERVICE_NAME, args.log_format)?;

    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let policy =
        if args.strict_health { HealthPolicy::Strict } else { HealthPolicy::DegradeOnPartialFailure };
    let pipeline = build_pipeline(&config, policy).await?;

    let server = ServerConfig {
        host: args.host,
        port: args.port,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };
    run_server(server, pipeline).await
}

/// Wire the backends together. Embedding initialization is fatal; an index
/// that fails validation only produces a warning.
async fn build_pipeline(config: &AppConfig, policy: HealthPolicy) -> anyhow::Result<QueryPipeline> {
    let model = OpenAIEmbeddingModel::from_config(&config.embedding)?;
    let embedder = EmbeddingProvider::new(
        Arc::new(model),
        config.embedding.clone(),
        config.index.vector_dimension,
    );
    embedder.initialize().await.context("embedding model failed to initialize")?;

    let index = ElasticsearchIndex::new(config.index.clone())?;
    let validation = index.validate().await;
    if validation.valid {
        info!(index = %validation.index_name, "index validated");
    } else {
        warn!(
            index = %validation.index_name,
            error = validation.error.as_deref().unwrap_or("unknown"),
            "index validation failed, queries may return no results"
        );
    }

    let generator = ChatCompletionsClient::new(&config.generation)?;

    let pipeline = QueryPipeline::builder()
        .index(Arc::new(index))
        .embedder(Arc::new(embedder))
        .generator(Arc::new(generator))
        .generation_config(config.generation.clone())
        .retrieval_config(config.retrieval.clone())
        .response_config(config.response)
        .health_policy(policy)
        .metrics(Metrics::new())
        .build()?;

    info!(
        model = %config.generation.model_name,
        embedding_model = %config.embedding.model_name,
        "query pipeline ready"
    );
    Ok(pipeline)
}
