//! API error types and HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::session::SessionError;

/// JSON error envelope returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Errors surfaced over HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { code: String, message: String },

    #[error("{message}")]
    Unauthorized { code: String, message: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("{message}")]
    NotFound { code: String, message: String },

    #[error("{message}")]
    BadGateway { code: String, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> String {
        match self {
            Self::BadRequest { code, .. }
            | Self::Unauthorized { code, .. }
            | Self::NotFound { code, .. }
            | Self::BadGateway { code, .. } => code.clone(),
            Self::Forbidden(_) => "forbidden".to_string(),
            Self::Internal(_) => "internal_error".to_string(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Validation { code, message } => Self::BadRequest {
                code: code.to_string(),
                message,
            },
            SessionError::NotFound { code, message } => Self::NotFound {
                code: code.to_string(),
                message,
            },
            SessionError::Forbidden(message) => Self::Forbidden(message),
            SessionError::Infra { code, message } => Self::BadGateway { code, message },
            SessionError::Store(e) => Self::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            error!(status = %status, code = %code, "request failed: {}", message);
        } else {
            warn!(status = %status, code = %code, "request rejected: {}", message);
        }

        (status, Json(ErrorResponse::new(message, code))).into_response()
    }
}
