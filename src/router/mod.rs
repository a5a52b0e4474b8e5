//! Reverse proxy routing traffic to per-session upstreams.
//!
//! The router holds a persistent route table mapping session ids to upstream
//! origins, an admin API the session manager drives, and HTTP/WebSocket proxy
//! handlers for everything under the configured base path.

pub mod admin;
pub mod client;
pub mod proxy;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{any, get},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::store::StateStore;

use proxy::ProxyClient;

/// Persisted route table document.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RouteDoc {
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
}

/// Shared state for all router handlers.
#[derive(Clone)]
pub struct RouterState {
    pub routes: Arc<StateStore<RouteDoc>>,
    pub admin_token: String,
    pub proxy: Arc<dyn ProxyClient>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Build the router's axum app.
///
/// Proxy routes are nested under `base_path` so session URLs look like
/// `{base_path}/{session_id}/...`; admin and health endpoints sit at the root.
pub fn create_router(state: RouterState, base_path: &str) -> Router {
    let proxied = Router::new()
        .route("/{session_id}", any(proxy::proxy_session_root))
        .route("/{session_id}/", any(proxy::proxy_session_root))
        .route("/{session_id}/{*path}", any(proxy::proxy_session));

    Router::new()
        .route("/health", get(health))
        .route(
            "/admin/sessions",
            get(admin::list_routes),
        )
        .route(
            "/admin/sessions/{session_id}",
            axum::routing::put(admin::put_route).delete(admin::delete_route),
        )
        .nest(base_path, proxied)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
