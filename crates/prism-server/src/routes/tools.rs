//! Direct tool invocation for debugging.
//!
//! Calls go straight to the query client, bypassing execution tracking, so
//! a test probe never pollutes the internals of a real request. Tool
//! failures come back as a 200 with an `error` field; only malformed
//! requests are rejected.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use prism_core::Toolbox;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/test", post(test_tool))
}

#[derive(Deserialize)]
struct ToolTestRequest {
    tool_name: String,
    #[serde(default)]
    args: Value,
}

async fn test_tool(
    State(state): State<AppState>,
    Json(req): Json<ToolTestRequest>,
) -> Result<Json<Value>, AppError> {
    if req.tool_name.is_empty() {
        return Err(AppError::BadRequest("tool_name is required".to_string()));
    }

    let toolbox = Arc::clone(&*state.toolbox.read().await);
    let call = build_call(&req, toolbox)?;

    let result = tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| AppError::Internal(format!("Tool task failed: {e}")))?;

    let response = match result {
        Ok(value) => json!({
            "tool_name": req.tool_name,
            "args": req.args,
            "result": value,
            "timestamp": Utc::now().to_rfc3339(),
        }),
        Err(e) => {
            tracing::error!(tool = %req.tool_name, "Tool test failed: {}", e);
            json!({
                "tool_name": req.tool_name,
                "args": req.args,
                "error": e.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
            })
        }
    };

    Ok(Json(response))
}

type ToolCall = Box<dyn FnOnce() -> Result<Value, prism_core::QueryError> + Send>;

fn build_call(req: &ToolTestRequest, toolbox: Arc<Toolbox>) -> Result<ToolCall, AppError> {
    let args = &req.args;
    match req.tool_name.as_str() {
        "list_databases" => Ok(Box::new(move || toolbox.client().list_databases())),
        "list_tables" => {
            let database = args
                .get("database")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AppError::BadRequest("database parameter is required".to_string())
                })?
                .to_string();
            let like = args.get("like").and_then(Value::as_str).map(String::from);
            let not_like = args
                .get("not_like")
                .and_then(Value::as_str)
                .map(String::from);
            Ok(Box::new(move || {
                toolbox
                    .client()
                    .list_tables(&database, like.as_deref(), not_like.as_deref())
            }))
        }
        "run_select_query" => {
            let query = args
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::BadRequest("query parameter is required".to_string()))?
                .to_string();
            Ok(Box::new(move || toolbox.client().run_select_query(&query)))
        }
        other => Err(AppError::BadRequest(format!("Unknown tool: {other}"))),
    }
}
