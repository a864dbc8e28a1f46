mod cache;
mod config;
mod db;
mod embeddings;
mod errors;
mod llm_client;
mod prompts;
mod routes;
mod state;
#[cfg(test)]
mod testing;
mod vector_store;
mod video;
mod workflow;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::RedisStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::embeddings::EmbeddingService;
use crate::llm_client::envelope::CallEnvelope;
use crate::llm_client::GeminiClient;
use crate::prompts::PromptStore;
use crate::routes::build_router;
use crate::state::AppState;
use crate::vector_store::PgVectorStore;
use crate::video::extract::{TesseractRecognizer, VideoExtractor};
use crate::video::frames::{DEFAULT_DEDUP_THRESHOLD, DEFAULT_FRAME_INTERVAL_MS};
use crate::workflow::AnalysisWorkflow;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let target = env!("CARGO_PKG_NAME").replace('-', "_");
            EnvFilter::new(format!("{}={}", target, &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CareerPilot API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL and the pgvector-backed knowledge index
    let pool = create_pool(&config.database_url).await?;
    let index = Arc::new(PgVectorStore::new(pool));
    index.ensure_schema().await?;
    info!("Vector store schema ready");

    // Initialize Redis-backed key-value store
    let redis = redis::Client::open(config.redis_url.clone())?;
    let store = Arc::new(RedisStore::new(redis));
    info!("Redis client initialized");

    // Initialize Gemini client
    let llm = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_base_url.clone(),
        config.chat_model.clone(),
        config.vision_model.clone(),
        config.embedding_model.clone(),
    )?);
    info!(
        "Gemini client initialized (chat: {}, vision: {}, embedding: {})",
        config.chat_model, config.vision_model, config.embedding_model
    );

    // Prompt store: Redis override → file → compiled-in default
    let prompts = Arc::new(PromptStore::new(
        store.clone() as Arc<dyn cache::KeyValueStore>,
        PathBuf::from(&config.prompt_dir),
    ));

    // Assemble the workflow with explicit collaborators
    let envelope = CallEnvelope::default();
    let embeddings = EmbeddingService::new(
        llm.clone(),
        store.clone(),
        prompts.clone(),
        envelope.clone(),
    );
    let video = VideoExtractor::new(
        llm.clone(),
        store.clone(),
        prompts.clone(),
        Arc::new(TesseractRecognizer),
        envelope.clone(),
        DEFAULT_FRAME_INTERVAL_MS,
        DEFAULT_DEDUP_THRESHOLD,
    );
    let workflow = Arc::new(AnalysisWorkflow::new(
        llm,
        store,
        index,
        prompts,
        embeddings,
        video,
        envelope,
    ));

    let state = AppState {
        workflow,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
