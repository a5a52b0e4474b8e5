//! Route definitions for the session manager API.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use super::tools;

/// GET /health: liveness plus a container runtime ping.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let runtime = if state.sessions.runtime_healthy().await {
        "ok"
    } else {
        "unreachable"
    };
    Json(json!({ "status": "ok", "container_runtime": runtime }))
}

/// Build the session manager's axum app.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invoke", post(tools::invoke))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
