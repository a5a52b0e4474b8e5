//! Session, snapshot, and user data models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named container image/configuration variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Plain webtop desktop.
    #[default]
    Default,
    /// Webtop with the Windsurf IDE preinstalled.
    Windsurf,
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Profile::Default => write!(f, "default"),
            Profile::Windsurf => write!(f, "windsurf"),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Profile::Default),
            "windsurf" => Ok(Profile::Windsurf),
            _ => Err(format!("unknown profile: {}", s)),
        }
    }
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is routable.
    Running,
    /// Session is stopped but its container and volume remain.
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// What realizes a session: a managed container or an external endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionBackend {
    /// A container and volume owned by this service.
    Managed {
        container_id: String,
        volume_id: String,
    },
    /// Route-only session pointing at an externally managed endpoint.
    Virtual { upstream: String },
}

impl SessionBackend {
    /// Volume backing this session, if any.
    pub fn volume_id(&self) -> Option<&str> {
        match self {
            SessionBackend::Managed { volume_id, .. } => Some(volume_id),
            SessionBackend::Virtual { .. } => None,
        }
    }

    /// Container backing this session, if any.
    pub fn container_id(&self) -> Option<&str> {
        match self {
            SessionBackend::Managed { container_id, .. } => Some(container_id),
            SessionBackend::Virtual { .. } => None,
        }
    }
}

/// Router-facing route recorded on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRoute {
    /// Public base path the router serves the session under.
    pub base_path: String,
    /// Upstream base URL the router forwards to.
    pub upstream: String,
}

/// One live (or virtual) webtop instance bound to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub profile: Profile,
    pub status: SessionStatus,
    /// Optional user-facing display name.
    #[serde(default)]
    pub name: Option<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 expiry, if a TTL is set.
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Stable public URL for the session.
    pub access_url: String,
    pub backend: SessionBackend,
    pub route: SessionRoute,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Snapshot this session was seeded from, if restored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from_snapshot: Option<String>,
}

impl Session {
    /// Whether the session's TTL has elapsed.
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&chrono::Utc) < now)
            .unwrap_or(false)
    }
}

/// Snapshot volume reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBackend {
    pub volume_id: String,
}

/// A frozen copy of a session's volume, used to seed new sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub user_id: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    pub source_session_id: String,
    pub profile: Profile,
    pub backend: SnapshotBackend,
}

/// A registered user with profile defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Opaque configuration blob.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// The manager's full persisted state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerState {
    #[serde(default)]
    pub users: BTreeMap<String, User>,
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
    #[serde(default)]
    pub snapshots: BTreeMap<String, Snapshot>,
}

/// Options accepted by `start_session`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSessionOptions {
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
    /// Supplying an upstream makes the session virtual: route only, no container.
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Options accepted by `restore_snapshot`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestoreSnapshotOptions {
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Per-resource outcome reported by `delete_session`.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub ok: bool,
    pub route: String,
    pub container: String,
    pub volume: String,
}
