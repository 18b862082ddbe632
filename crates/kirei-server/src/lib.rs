//! Kirei Server
//!
//! HTTP surface over the retrieval-augmented chat agent: one-shot and
//! streamed chat turns plus a health probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::Method, routing::get, Json, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use kirei_core::agent::{AgentRunner, AnthropicClient, ToolLoopAgent};
use kirei_core::embeddings::{Embedder, GeminiEmbedder};
use kirei_core::knowledge::{KnowledgeStore, SqliteKnowledgeStore};
use kirei_core::retrieval::{KnowledgeSearchTool, Retriever};
use kirei_core::stream::StreamCoordinator;
use kirei_core::tools::ToolRegistry;
use kirei_core::KireiConfig;

mod error;
pub mod ingest;
mod routes;
mod types;

pub use error::{ApiError, AppError};
pub use routes::X_THREAD_ID;
pub use types::{ChatRequest, ChatResponse, HealthResponse};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Agent answering chat turns
    pub agent: Arc<dyn AgentRunner>,
    /// Starts streamed sessions against `agent`
    pub coordinator: StreamCoordinator,
}

impl AppState {
    pub fn new(agent: Arc<dyn AgentRunner>) -> Self {
        Self {
            coordinator: StreamCoordinator::new(agent.clone()),
            agent,
        }
    }
}

/// Process-scoped collaborators built once at startup
pub struct Services {
    pub store: Arc<dyn KnowledgeStore>,
    pub embedder: Arc<dyn Embedder>,
    pub agent: Arc<dyn AgentRunner>,
}

impl Services {
    /// Wire the knowledge store, embedder, retriever, tools and agent from config.
    pub async fn from_config(config: &KireiConfig) -> Self {
        let store: Arc<dyn KnowledgeStore> =
            Arc::new(SqliteKnowledgeStore::new(&config.db_path));

        let gemini = GeminiEmbedder::from_config(config);
        if !gemini.has_api_key() {
            tracing::warn!("GOOGLE_API_KEY is not set; knowledge search will return errors");
        }
        let embedder: Arc<dyn Embedder> = Arc::new(gemini);

        let retriever = Arc::new(
            Retriever::new(store.clone(), embedder.clone(), config.collection.clone())
                .with_top_k(config.top_k),
        );

        let tools = Arc::new(ToolRegistry::new());
        tools
            .register(Arc::new(KnowledgeSearchTool::new(retriever)))
            .await;

        let client = AnthropicClient::from_config(config);
        if !client.has_api_key() {
            tracing::warn!("ANTHROPIC_API_KEY is not set; chat turns will fail");
        }
        let agent: Arc<dyn AgentRunner> =
            Arc::new(ToolLoopAgent::new(Arc::new(client), tools));

        tracing::info!(
            collection = %config.collection,
            db = %config.db_path.display(),
            model = %config.model,
            "Services initialized"
        );

        Self {
            store,
            embedder,
            agent,
        }
    }
}

/// Build the Axum router over the given state.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([X_THREAD_ID]);

    Router::new()
        .route("/health", get(health))
        .merge(routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Kirei server and block until shutdown.
pub async fn start_server(config: KireiConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let services = Services::from_config(&config).await;
    let app = build_router(AppState::new(services.agent));

    tracing::info!("Kirei server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
