//! Model listing in the OpenAI list shape.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_models))
}

async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let created = Utc::now().timestamp();
    let data: Vec<Value> = state
        .models
        .list()
        .await
        .into_iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "object": "model",
                "created": created,
                "owned_by": "prism",
                "permission": [],
                "root": entry.id,
                "parent": null,
                "description": entry.description,
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}
