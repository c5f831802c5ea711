use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use knowledge_agent::api::{router, AppState};
use knowledge_agent::config::AppConfig;
use knowledge_agent::llm::ModelRouter;
use knowledge_agent::rag::embeddings::build_embedder;

#[derive(Parser, Debug)]
#[command(name = "knowledge-agent")]
#[command(about = "Extraction, summarization, RAG chat and guidelines backend")]
struct Args {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "KB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Azure endpoint: {}", config.models.azure.endpoint);
    tracing::info!("Ollama: {} ({})", config.models.ollama.base_url, config.models.ollama.model);
    tracing::info!("Index directory: {}", config.storage.index_dir.display());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let config = Arc::new(config);
    let models = Arc::new(ModelRouter::from_config(&config.models, client.clone()));
    let embedder = build_embedder(&config, client.clone())?;
    tracing::info!("Embedding model: {}", embedder.model_id());

    let state = Arc::new(AppState::new(config.clone(), models, embedder, client)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address()))?;
    tracing::info!("Backend server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
