use thiserror::Error;

use crate::container::ContainerError;
use crate::router::client::RouterClientError;

/// Result type for session manager operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors from session manager operations.
///
/// Each variant carries a stable machine-readable code so callers can map it
/// to an HTTP status and error envelope without string matching.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The caller supplied something invalid (400).
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    /// The referenced entity does not exist (404).
    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    /// The caller is not allowed to touch this entity (403).
    #[error("{0}")]
    Forbidden(String),

    /// A downstream dependency failed (502).
    #[error("{message}")]
    Infra { code: String, message: String },

    /// Persisting state failed (500).
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SessionError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    /// The stable error code for this error.
    pub fn code(&self) -> &str {
        match self {
            Self::Validation { code, .. } | Self::NotFound { code, .. } => code,
            Self::Forbidden(_) => "forbidden",
            Self::Infra { code, .. } => code,
            Self::Store(_) => "state_store_failed",
        }
    }
}

impl From<ContainerError> for SessionError {
    fn from(err: ContainerError) -> Self {
        Self::Infra {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<RouterClientError> for SessionError {
    fn from(err: RouterClientError) -> Self {
        let code = match &err {
            RouterClientError::Unreachable { .. } => "router_unreachable",
            RouterClientError::Rejected { .. } => "router_rejected",
        };
        Self::Infra {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}
