//! Runtime configuration endpoints.
//!
//! Updates apply immediately: the invoker and toolbox are rebuilt from the
//! new values so the next request picks them up. Nothing is persisted.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use prism_core::{QueryServiceClient, Toolbox};

use crate::{create_invoker, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_config))
        .route("/update", post(update_config))
}

#[derive(Serialize)]
struct ConfigResponse {
    enabled: bool,
    model_id: String,
    agent_endpoint: Option<String>,
    query_service_url: String,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ConfigUpdate {
    model_id: Option<String>,
    agent_endpoint: Option<String>,
    query_service_url: Option<String>,
    system_prompt: Option<String>,
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let config = state.config.read().await;
    Json(ConfigResponse {
        enabled: config.agent_endpoint.is_some(),
        model_id: config.model_id.clone(),
        agent_endpoint: config.agent_endpoint.clone(),
        query_service_url: config.query_service_url.clone(),
        max_tokens: config.max_tokens,
    })
}

async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Json<ConfigResponse> {
    let updated = {
        let mut config = state.config.write().await;
        if let Some(model_id) = update.model_id {
            config.model_id = model_id;
        }
        if let Some(endpoint) = update.agent_endpoint {
            config.agent_endpoint = Some(endpoint);
        }
        if let Some(url) = update.query_service_url {
            config.query_service_url = url;
        }
        if let Some(prompt) = update.system_prompt {
            config.system_prompt = prompt;
        }
        config.clone()
    };

    // Rebuild the collaborators so new values take effect immediately.
    let toolbox = Arc::new(Toolbox::new(QueryServiceClient::new(
        &updated.query_service_url,
    )));
    *state.invoker.write().await = create_invoker(&updated, Arc::clone(&toolbox));
    *state.toolbox.write().await = toolbox;

    tracing::info!(model = %updated.model_id, "Configuration updated");

    Json(ConfigResponse {
        enabled: updated.agent_endpoint.is_some(),
        model_id: updated.model_id,
        agent_endpoint: updated.agent_endpoint,
        query_service_url: updated.query_service_url,
        max_tokens: updated.max_tokens,
    })
}
