//! Agent internals for debugging and visualization.

use axum::{extract::State, routing::get, Json, Router};

use prism_core::{AgentInternals, LogSnapshot};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_internals))
}

/// Internals of the most recently completed request, or an empty snapshot
/// when nothing has run yet.
async fn get_internals(State(state): State<AppState>) -> Json<AgentInternals> {
    if let Some(internals) = state.last_internals.read().await.clone() {
        return Json(internals);
    }

    let config = state.config.read().await;
    Json(AgentInternals::from_snapshot(&LogSnapshot::default(), &config))
}
