//! Admin API for the route table.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, Uri},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::error::ApiError;
use crate::auth::require_bearer;

use super::RouterState;

#[derive(Debug, Serialize, Deserialize)]
pub struct PutRouteRequest {
    pub upstream: String,
}

fn validate_upstream(upstream: &str) -> Result<(), ApiError> {
    let uri: Uri = upstream.parse().map_err(|_| {
        ApiError::bad_request("invalid_upstream", format!("'{}' is not a valid URL", upstream))
    })?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(ApiError::bad_request(
            "invalid_upstream",
            format!("'{}' must include a scheme and host", upstream),
        ));
    }
    Ok(())
}

/// PUT /admin/sessions/{session_id}: upsert a route. Idempotent.
pub async fn put_route(
    State(state): State<RouterState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PutRouteRequest>,
) -> Result<Json<Value>, ApiError> {
    require_bearer(&headers, &state.admin_token)?;
    validate_upstream(&body.upstream)?;

    let upstream = body.upstream.clone();
    state
        .routes
        .mutate(move |doc| {
            doc.routes.insert(session_id.clone(), upstream);
        })
        .await
        .map_err(ApiError::Internal)?;

    info!(upstream = %body.upstream, "registered route");
    Ok(Json(json!({ "ok": true })))
}

/// DELETE /admin/sessions/{session_id}: drop a route. Missing routes are a
/// success, deletes are idempotent.
pub async fn delete_route(
    State(state): State<RouterState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_bearer(&headers, &state.admin_token)?;

    state
        .routes
        .mutate(move |doc| {
            doc.routes.remove(&session_id);
        })
        .await
        .map_err(ApiError::Internal)?;

    Ok(Json(json!({ "ok": true })))
}

/// GET /admin/sessions: the full route table.
pub async fn list_routes(
    State(state): State<RouterState>,
    headers: HeaderMap,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    require_bearer(&headers, &state.admin_token)?;

    let routes = state.routes.read(|doc| doc.routes.clone()).await;
    Ok(Json(routes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_upstream_accepts_http_url() {
        assert!(validate_upstream("http://desktop-1:3000").is_ok());
    }

    #[test]
    fn test_validate_upstream_rejects_bare_host() {
        assert!(validate_upstream("desktop-1:3000").is_err());
        assert!(validate_upstream("/just/a/path").is_err());
        assert!(validate_upstream("").is_err());
    }
}
