//! Container creation configuration and input validation.

use std::collections::HashMap;

use super::error::{ContainerError, ContainerResult};

/// A volume mount for a container.
#[derive(Debug, Clone)]
pub struct VolumeMount {
    /// Named volume on the runtime side.
    pub source: String,
    /// Mount point inside the container.
    pub target: String,
    /// Mount read-only.
    pub read_only: bool,
}

/// Configuration for creating a new container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name (optional).
    pub name: Option<String>,
    /// Container hostname.
    pub hostname: Option<String>,
    /// OCI image to use.
    pub image: String,
    /// Command to run instead of the image default.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Volume mounts.
    pub volumes: Vec<VolumeMount>,
    /// Network to attach (actual runtime network name, already resolved).
    pub network: Option<String>,
    /// Remove the container automatically when it exits.
    pub auto_remove: bool,
}

impl ContainerConfig {
    /// Create a new container config with the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Validate all fields before handing them to the runtime CLI.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;
        if let Some(ref name) = self.name {
            validate_resource_name(name, "container name")?;
        }
        if let Some(ref hostname) = self.hostname {
            validate_resource_name(hostname, "hostname")?;
        }
        if let Some(ref network) = self.network {
            validate_resource_name(network, "network name")?;
        }
        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }
        for mount in &self.volumes {
            validate_resource_name(&mount.source, "volume name")?;
            validate_mount_target(&mount.target)?;
        }
        Ok(())
    }

    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the container hostname.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the command to run.
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Mount a named volume read-write.
    pub fn volume(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            source: source.into(),
            target: target.into(),
            read_only: false,
        });
        self
    }

    /// Mount a named volume read-only.
    pub fn volume_ro(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.volumes.push(VolumeMount {
            source: source.into(),
            target: target.into(),
            read_only: true,
        });
        self
    }

    /// Attach to a runtime network (already resolved to its actual name).
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Remove the container automatically when it exits.
    pub fn auto_remove(mut self) -> Self {
        self.auto_remove = true;
        self
    }
}

/// Validate an OCI image name.
///
/// Image names follow `[registry/][namespace/]name[:tag][@digest]`.
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }
    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }
    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };
    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{}' contains invalid characters",
            image
        )));
    }
    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }
    Ok(())
}

/// Validate a container, volume, or network name.
///
/// Names must be alphanumeric with `.`, `-`, `_`, starting with an
/// alphanumeric character or underscore.
pub fn validate_resource_name(name: &str, what: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidInput(format!(
            "{} cannot be empty",
            what
        )));
    }
    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(format!(
            "{} exceeds maximum length of 128 characters",
            what
        )));
    }
    let first = name.chars().next().unwrap();
    if !first.is_ascii_alphanumeric() && first != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "{} must start with an alphanumeric character or underscore",
            what
        )));
    }
    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "{} '{}' contains invalid characters",
            what, name
        )));
    }
    Ok(())
}

/// Validate a container-internal mount point.
fn validate_mount_target(path: &str) -> ContainerResult<()> {
    if path.is_empty() {
        return Err(ContainerError::InvalidInput(
            "mount target cannot be empty".to_string(),
        ));
    }
    if !path.starts_with('/') {
        return Err(ContainerError::InvalidInput(
            "mount target must be absolute (start with '/')".to_string(),
        ));
    }
    if path.contains('\0') || path.contains(',') || path.contains(':') {
        return Err(ContainerError::InvalidInput(format!(
            "mount target '{}' contains invalid characters",
            path
        )));
    }
    Ok(())
}

/// Validate an environment variable key (POSIX conventions).
fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    if key.is_empty() {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    }
    let first = key.chars().next().unwrap();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' must start with a letter or underscore",
            key
        )));
    }
    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !key.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters",
            key
        )));
    }
    Ok(())
}
