//! Bearer token checks for admin endpoints.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::api::error::ApiError;

/// Require a valid `Authorization: Bearer <token>` header.
///
/// A missing or malformed header is 401; a well-formed header carrying the
/// wrong token is 403.
pub fn require_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized {
            code: "missing_token".to_string(),
            message: "missing Authorization header".to_string(),
        })?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized {
            code: "missing_token".to_string(),
            message: "Authorization header must be a Bearer token".to_string(),
        })?;

    if token != expected {
        return Err(ApiError::Forbidden("admin token does not match".to_string()));
    }
    Ok(())
}
