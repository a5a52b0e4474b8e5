//! Container backend adapter.
//!
//! Thin async interface to the container runtime (Docker or Podman CLI):
//! container lifecycle, named volumes, volume byte copies via a short-lived
//! helper container, and logical-to-actual network name resolution.

mod config;
mod error;

pub use config::{ContainerConfig, VolumeMount, validate_image_name, validate_resource_name};
pub use error::{ContainerError, ContainerResult};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime.
    #[default]
    Docker,
    /// Podman runtime.
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Container backend abstraction.
///
/// The session manager only talks to the runtime through this trait, so tests
/// substitute an in-memory backend.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Create and start a container, returning its ID.
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String>;
    /// Stop a running container.
    async fn stop_container(&self, id: &str, timeout_seconds: Option<u32>) -> ContainerResult<()>;
    /// Force-remove a container. A missing container is not an error.
    async fn remove_container(&self, id: &str) -> ContainerResult<()>;
    /// Create a named volume, returning its name.
    async fn create_volume(&self, name: &str) -> ContainerResult<String>;
    /// Remove a named volume. A missing volume is not an error.
    async fn remove_volume(&self, name: &str) -> ContainerResult<()>;
    /// Copy all bytes from one volume into another via a helper container.
    ///
    /// The source is mounted read-only. With `wipe_dest` the destination is
    /// emptied before the copy.
    async fn copy_volume(&self, source: &str, dest: &str, wipe_dest: bool) -> ContainerResult<()>;
    /// Resolve a logical network name to the runtime's actual network name.
    async fn resolve_network(&self, logical: &str) -> ContainerResult<String>;
    /// Check whether an image exists locally.
    async fn image_exists(&self, image: &str) -> ContainerResult<bool>;
    /// Pull an image from its registry.
    async fn pull_image(&self, image: &str) -> ContainerResult<()>;
    /// Check the runtime is reachable, returning its version string.
    async fn ping(&self) -> ContainerResult<String>;
}

/// Container backend speaking to the Docker/Podman CLI.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    runtime_type: RuntimeType,
    binary: String,
    /// Image used for the throwaway volume-copy helper container.
    helper_image: String,
}

impl DockerBackend {
    /// Create a backend for the given runtime type with its default binary.
    pub fn new(runtime_type: RuntimeType, helper_image: impl Into<String>) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
            helper_image: helper_image.into(),
        }
    }

    /// Create a backend with a custom binary path.
    pub fn with_binary(
        runtime_type: RuntimeType,
        binary: impl Into<String>,
        helper_image: impl Into<String>,
    ) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
            helper_image: helper_image.into(),
        }
    }

    /// Get the runtime type.
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    async fn run(&self, command: &str, args: &[String]) -> ContainerResult<String> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Whether a CLI failure means the resource was already gone.
fn is_not_found(err: &ContainerError) -> bool {
    match err {
        ContainerError::CommandFailed { message, .. } => {
            let lower = message.to_lowercase();
            lower.contains("no such") || lower.contains("not found")
        }
        ContainerError::ContainerNotFound(_) => true,
        _ => false,
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;

        let mut args: Vec<String> = vec!["run".to_string(), "-d".to_string()];

        if config.auto_remove {
            args.push("--rm".to_string());
        }
        if let Some(ref name) = config.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        if let Some(ref hostname) = config.hostname {
            args.push("--hostname".to_string());
            args.push(hostname.clone());
        }
        if let Some(ref network) = config.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for mount in &config.volumes {
            args.push("-v".to_string());
            if mount.read_only {
                args.push(format!("{}:{}:ro", mount.source, mount.target));
            } else {
                args.push(format!("{}:{}", mount.source, mount.target));
            }
        }
        for (key, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(config.image.clone());
        for cmd in &config.command {
            args.push(cmd.clone());
        }

        let stdout = self.run("create", &args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn stop_container(&self, id: &str, timeout_seconds: Option<u32>) -> ContainerResult<()> {
        validate_resource_name(id, "container id")?;

        let mut args: Vec<String> = vec!["stop".to_string()];
        if let Some(t) = timeout_seconds {
            args.push("-t".to_string());
            args.push(t.to_string());
        }
        args.push(id.to_string());

        self.run("stop", &args).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> ContainerResult<()> {
        validate_resource_name(id, "container id")?;

        let args = vec!["rm".to_string(), "-f".to_string(), id.to_string()];
        match self.run("rm", &args).await {
            Ok(_) => Ok(()),
            Err(ref e) if is_not_found(e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_volume(&self, name: &str) -> ContainerResult<String> {
        validate_resource_name(name, "volume name")?;

        let args = vec!["volume".to_string(), "create".to_string(), name.to_string()];
        let stdout = self.run("volume create", &args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn remove_volume(&self, name: &str) -> ContainerResult<()> {
        validate_resource_name(name, "volume name")?;

        let args = vec![
            "volume".to_string(),
            "rm".to_string(),
            "-f".to_string(),
            name.to_string(),
        ];
        match self.run("volume rm", &args).await {
            Ok(_) => Ok(()),
            Err(ref e) if is_not_found(e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn copy_volume(&self, source: &str, dest: &str, wipe_dest: bool) -> ContainerResult<()> {
        validate_resource_name(source, "volume name")?;
        validate_resource_name(dest, "volume name")?;

        // `find -mindepth 1 -delete` clears dotfiles too, unlike `rm -rf /to/*`.
        let script = if wipe_dest {
            "find /to -mindepth 1 -delete && cp -a /from/. /to/"
        } else {
            "cp -a /from/. /to/"
        };

        let args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/from:ro", source),
            "-v".to_string(),
            format!("{}:/to", dest),
            self.helper_image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ];

        self.run("copy", &args).await?;
        Ok(())
    }

    async fn resolve_network(&self, logical: &str) -> ContainerResult<String> {
        validate_resource_name(logical, "network name")?;

        let args = vec![
            "network".to_string(),
            "ls".to_string(),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ];
        let stdout = self.run("network ls", &args).await?;

        let names: Vec<&str> = stdout.lines().map(str::trim).collect();
        if names.contains(&logical) {
            return Ok(logical.to_string());
        }
        // Compose prefixes networks with the project name: <project>_<network>.
        let suffix = format!("_{}", logical);
        if let Some(name) = names.iter().find(|n| n.ends_with(&suffix)) {
            return Ok(name.to_string());
        }

        Err(ContainerError::NetworkNotFound(logical.to_string()))
    }

    async fn image_exists(&self, image: &str) -> ContainerResult<bool> {
        validate_image_name(image)?;

        let output = Command::new(&self.binary)
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "image inspect".to_string(),
                message: e.to_string(),
            })?;

        Ok(output.status.success())
    }

    async fn pull_image(&self, image: &str) -> ContainerResult<()> {
        validate_image_name(image)?;

        let args = vec!["pull".to_string(), image.to_string()];
        self.run("pull", &args).await?;
        Ok(())
    }

    async fn ping(&self) -> ContainerResult<String> {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        let stdout = self.run("version", &args).await?;
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_type_binary() {
        assert_eq!(RuntimeType::Docker.default_binary(), "docker");
        assert_eq!(RuntimeType::Podman.default_binary(), "podman");
    }

    #[test]
    fn test_is_not_found() {
        let err = ContainerError::CommandFailed {
            command: "rm".to_string(),
            message: "Error: No such container: webtop-abc".to_string(),
        };
        assert!(is_not_found(&err));

        let err = ContainerError::CommandFailed {
            command: "rm".to_string(),
            message: "permission denied".to_string(),
        };
        assert!(!is_not_found(&err));
    }

    #[test]
    fn test_error_codes() {
        let err = ContainerError::CommandFailed {
            command: "create".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.code(), "docker_create_failed");

        let err = ContainerError::CommandFailed {
            command: "volume create".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.code(), "docker_volume_create_failed");
    }
}
