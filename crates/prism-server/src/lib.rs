//! Prism Server
//!
//! HTTP API for the prism analytics agent: OpenAI-style chat completions
//! with live execution-progress streaming, plus introspection and
//! configuration endpoints. This is a library crate — the server is
//! started via `start_server()`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::Method,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use prism_core::{
    AgentConfig, AgentInternals, AgentInvoker, ListenerRegistry, QueryServiceClient, RemoteAgent,
    Toolbox,
};

pub mod error;
pub mod models;
pub mod routes;
pub mod types;

use models::ModelRegistry;

/// Configuration for starting the server.
pub struct ServerConfig {
    /// Port to listen on (default: 3000).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AgentConfig>>,
    /// None until an agent endpoint is configured.
    pub invoker: Arc<RwLock<Option<Arc<dyn AgentInvoker>>>>,
    pub toolbox: Arc<RwLock<Arc<Toolbox>>>,
    pub listeners: Arc<ListenerRegistry>,
    pub models: Arc<ModelRegistry>,
    /// Internals snapshot of the most recently completed request.
    pub last_internals: Arc<RwLock<Option<AgentInternals>>>,
}

/// Build an agent invoker from the current configuration, executing tools
/// through the given toolbox.
pub fn create_invoker(config: &AgentConfig, toolbox: Arc<Toolbox>) -> Option<Arc<dyn AgentInvoker>> {
    match &config.agent_endpoint {
        Some(endpoint) => Some(Arc::new(RemoteAgent::new(
            endpoint,
            &config.system_prompt,
            toolbox,
        ))),
        None => {
            tracing::warn!(
                "No agent endpoint configured; chat API will be unavailable until one is set"
            );
            None
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(agent_config: AgentConfig) -> (Router, AppState) {
    let toolbox = Arc::new(Toolbox::new(QueryServiceClient::new(
        &agent_config.query_service_url,
    )));
    let invoker = create_invoker(&agent_config, Arc::clone(&toolbox));
    let models = Arc::new(ModelRegistry::with_default(&agent_config.model_id));

    let state = AppState {
        config: Arc::new(RwLock::new(agent_config)),
        invoker: Arc::new(RwLock::new(invoker)),
        toolbox: Arc::new(RwLock::new(toolbox)),
        listeners: Arc::new(ListenerRegistry::new()),
        models,
        last_internals: Arc::new(RwLock::new(None)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    (app, state)
}

/// Start the prism server and block until shutdown.
pub async fn start_server(config: ServerConfig, agent_config: AgentConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let (app, _state) = build_router(agent_config);

    tracing::info!("Prism server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let agent = if state.invoker.read().await.is_some() {
        "ok"
    } else {
        "error"
    };

    let toolbox = Arc::clone(&*state.toolbox.read().await);
    let query_service = match tokio::task::spawn_blocking(move || {
        toolbox.client().list_databases()
    })
    .await
    {
        Ok(Ok(_)) => "ok",
        Ok(Err(e)) => {
            tracing::error!("Query service health check failed: {}", e);
            "error"
        }
        Err(e) => {
            tracing::error!("Query service health check panicked: {}", e);
            "error"
        }
    };

    let status = if agent == "ok" && query_service == "ok" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        features: HashMap::from([
            ("agent".to_string(), agent.to_string()),
            ("query_service".to_string(), query_service.to_string()),
        ]),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    features: HashMap<String, String>,
}
