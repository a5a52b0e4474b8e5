//! Container backend error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur while talking to the container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime CLI command failed.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Container was not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Image was not found locally and could not be pulled.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// No network matching the configured logical name exists.
    #[error("network not found: {0}")]
    NetworkNotFound(String),

    /// Failed to parse runtime output.
    #[error("failed to parse container output: {0}")]
    ParseError(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    /// Short error code for the failing operation, used in API envelopes.
    pub fn code(&self) -> String {
        match self {
            ContainerError::CommandFailed { command, .. } => {
                format!("docker_{}_failed", command.replace(' ', "_"))
            }
            ContainerError::ContainerNotFound(_) => "docker_container_not_found".to_string(),
            ContainerError::ImageNotFound(_) => "docker_pull_failed".to_string(),
            ContainerError::NetworkNotFound(_) => "docker_network_not_found".to_string(),
            ContainerError::ParseError(_) => "docker_parse_failed".to_string(),
            ContainerError::InvalidInput(_) => "invalid_input".to_string(),
            ContainerError::Io(_) => "docker_io_failed".to_string(),
        }
    }
}
