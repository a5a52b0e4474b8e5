//! Session lifecycle orchestration.
//!
//! `SessionService` owns every mutation of sessions, snapshots and users. It
//! provisions container resources through the [`ContainerBackend`] adapter,
//! keeps the router's route table in sync through [`RouterApi`], and persists
//! all metadata through the single-writer [`StateStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::container::{ContainerBackend, ContainerConfig};
use crate::router::client::RouterApi;
use crate::session::error::{SessionError, SessionResult};
use crate::session::models::{
    DeleteOutcome, ManagerState, Profile, RestoreSnapshotOptions, Session, SessionBackend,
    SessionRoute, SessionStatus, Snapshot, SnapshotBackend, StartSessionOptions, User,
};
use crate::store::StateStore;

const MAX_SESSION_NAME_LEN: usize = 200;

/// Per-profile container settings.
#[derive(Debug, Clone)]
pub struct WindsurfProfile {
    pub image: String,
    pub install_mode: String,
    pub version: Option<String>,
    pub download_url_template: Option<String>,
    pub cache_volume: Option<String>,
}

/// Settings the session manager needs to provision desktops.
#[derive(Debug, Clone)]
pub struct SessionServiceConfig {
    /// Path prefix the router serves sessions under, e.g. `/desktops`.
    pub base_path: String,
    /// Public origin users reach the router at, e.g. `https://webtop.example.com`.
    pub public_base_url: String,
    /// Scheme for container upstreams (`http` or `https`).
    pub upstream_scheme: String,
    /// Port the desktop listens on inside its container.
    pub internal_port: u16,
    /// Logical network name, resolved against the runtime (compose-aware).
    pub network: String,
    pub timezone: String,
    pub uid: u32,
    pub gid: u32,
    pub password: Option<String>,
    /// Optional shared volume mounted read-write into every managed session.
    pub workspace_volume: Option<String>,
    /// Image for the default desktop profile.
    pub default_image: String,
    pub windsurf: WindsurfProfile,
    /// TTL applied to new sessions when the caller does not pass one.
    pub default_ttl_minutes: Option<i64>,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            base_path: "/desktops".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            upstream_scheme: "http".to_string(),
            internal_port: 3000,
            network: "webtop".to_string(),
            timezone: "Etc/UTC".to_string(),
            uid: 1000,
            gid: 1000,
            password: None,
            workspace_volume: None,
            default_image: "lscr.io/linuxserver/webtop:ubuntu-xfce".to_string(),
            windsurf: WindsurfProfile {
                image: "lscr.io/linuxserver/webtop:ubuntu-xfce".to_string(),
                install_mode: "download".to_string(),
                version: None,
                download_url_template: None,
                cache_volume: None,
            },
            default_ttl_minutes: None,
        }
    }
}

/// Orchestrates session, snapshot and user operations.
pub struct SessionService {
    store: Arc<StateStore<ManagerState>>,
    backend: Arc<dyn ContainerBackend>,
    router: Arc<dyn RouterApi>,
    config: SessionServiceConfig,
}

struct Provisioned {
    container_id: String,
    container_name: String,
    volume_id: String,
    upstream: String,
}

impl SessionService {
    pub fn new(
        store: Arc<StateStore<ManagerState>>,
        backend: Arc<dyn ContainerBackend>,
        router: Arc<dyn RouterApi>,
        config: SessionServiceConfig,
    ) -> Self {
        Self {
            store,
            backend,
            router,
            config,
        }
    }

    pub fn config(&self) -> &SessionServiceConfig {
        &self.config
    }

    fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn image_for(&self, profile: Profile) -> &str {
        match profile {
            Profile::Default => &self.config.default_image,
            Profile::Windsurf => &self.config.windsurf.image,
        }
    }

    fn route_for(&self, session_id: &str, upstream: &str) -> SessionRoute {
        SessionRoute {
            base_path: format!("{}/{}", self.config.base_path, session_id),
            upstream: upstream.to_string(),
        }
    }

    fn access_url(&self, session_id: &str) -> String {
        format!(
            "{}{}/{}/",
            self.config.public_base_url.trim_end_matches('/'),
            self.config.base_path,
            session_id
        )
    }

    fn parse_profile(raw: Option<&str>) -> SessionResult<Profile> {
        match raw {
            None => Ok(Profile::default()),
            Some(s) => s.parse().map_err(|_| {
                SessionError::validation("invalid_profile", format!("unknown profile '{}'", s))
            }),
        }
    }

    fn expiry_from_ttl(&self, ttl_minutes: Option<i64>) -> SessionResult<Option<String>> {
        let ttl = ttl_minutes.or(self.config.default_ttl_minutes);
        match ttl {
            None => Ok(None),
            Some(m) if m <= 0 => Err(SessionError::validation(
                "invalid_ttl",
                format!("ttl_minutes must be positive, got {}", m),
            )),
            Some(m) => Ok(Some((Utc::now() + Duration::minutes(m)).to_rfc3339())),
        }
    }

    fn validate_name(name: &str) -> SessionResult<()> {
        if name.is_empty() || name.chars().count() > MAX_SESSION_NAME_LEN {
            return Err(SessionError::validation(
                "invalid_name",
                format!("name must be 1..={} characters", MAX_SESSION_NAME_LEN),
            ));
        }
        Ok(())
    }

    /// Provision network, image, volume and container for a managed session.
    ///
    /// Rolls back the volume (and never leaves a half-seeded one behind) if a
    /// later step fails, so a failed start does not leak resources.
    async fn provision(
        &self,
        profile: Profile,
        session_id: &str,
        seed_volume: Option<&str>,
    ) -> SessionResult<Provisioned> {
        let network = self.backend.resolve_network(&self.config.network).await?;

        let image = self.image_for(profile).to_string();
        if !self.backend.image_exists(&image).await? {
            info!(image = %image, "pulling image");
            self.backend.pull_image(&image).await?;
        }

        let short = &session_id[..session_id.len().min(12)];
        let volume_id = format!("webtop-vol-{}", short);
        self.backend.create_volume(&volume_id).await?;

        if let Some(src) = seed_volume {
            if let Err(e) = self.backend.copy_volume(src, &volume_id, true).await {
                let _ = self.backend.remove_volume(&volume_id).await;
                return Err(e.into());
            }
        }

        let container_name = format!("webtop-{}", short);
        let mut cfg = ContainerConfig::new(&image)
            .name(&container_name)
            .hostname(&container_name)
            .network(&network)
            .volume(&volume_id, "/config")
            .env("TZ", &self.config.timezone)
            .env("PUID", self.config.uid.to_string())
            .env("PGID", self.config.gid.to_string());

        if let Some(password) = &self.config.password {
            cfg = cfg.env("PASSWORD", password);
        }
        if let Some(workspace) = &self.config.workspace_volume {
            cfg = cfg.volume(workspace, "/workspace");
        }
        if profile == Profile::Windsurf {
            let ws = &self.config.windsurf;
            cfg = cfg.env("WINDSURF_INSTALL_MODE", &ws.install_mode);
            if let Some(version) = &ws.version {
                cfg = cfg.env("WINDSURF_VERSION", version);
            }
            if let Some(template) = &ws.download_url_template {
                cfg = cfg.env("WINDSURF_URL_TEMPLATE", template);
            }
            if let Some(cache) = &ws.cache_volume {
                cfg = cfg.volume(cache, "/windsurf-cache");
            }
        }

        cfg.validate().map_err(|e| SessionError::Infra {
            code: e.code(),
            message: e.to_string(),
        })?;

        let container_id = match self.backend.create_container(&cfg).await {
            Ok(id) => id,
            Err(e) => {
                let _ = self.backend.remove_volume(&volume_id).await;
                return Err(e.into());
            }
        };

        let upstream = format!(
            "{}://{}:{}",
            self.config.upstream_scheme, container_name, self.config.internal_port
        );

        Ok(Provisioned {
            container_id,
            container_name,
            volume_id,
            upstream,
        })
    }

    /// Start a new session for a user.
    ///
    /// With `options.upstream` set this registers a virtual session that only
    /// exists as a route entry. Otherwise it provisions a managed desktop
    /// container and its dedicated volume.
    pub async fn start_session(
        &self,
        user_id: &str,
        options: StartSessionOptions,
    ) -> SessionResult<Session> {
        if user_id.is_empty() {
            return Err(SessionError::validation("missing_field", "user_id is required"));
        }
        if let Some(name) = &options.name {
            Self::validate_name(name)?;
        }

        let profile = Self::parse_profile(options.profile.as_deref())?;
        let expires_at = self.expiry_from_ttl(options.ttl_minutes)?;
        let session_id = Self::new_id();
        let now = Utc::now().to_rfc3339();

        let (backend, upstream) = match options.upstream {
            Some(upstream) => {
                if upstream.is_empty() {
                    return Err(SessionError::validation(
                        "invalid_upstream",
                        "upstream must be a non-empty URL",
                    ));
                }
                (SessionBackend::Virtual { upstream: upstream.clone() }, upstream)
            }
            None => {
                let provisioned = self.provision(profile, &session_id, None).await?;
                info!(
                    session_id = %session_id,
                    container = %provisioned.container_name,
                    "provisioned managed session"
                );
                let upstream = provisioned.upstream.clone();
                (
                    SessionBackend::Managed {
                        container_id: provisioned.container_id,
                        volume_id: provisioned.volume_id,
                    },
                    upstream,
                )
            }
        };

        if let Err(e) = self.router.put_route(&session_id, &upstream).await {
            // A managed session that never got a route is unreachable, tear
            // the container and volume down before surfacing the failure.
            if let SessionBackend::Managed { container_id, volume_id } = &backend {
                let _ = self.backend.remove_container(container_id).await;
                let _ = self.backend.remove_volume(volume_id).await;
            }
            return Err(e.into());
        }

        let session = Session {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            profile,
            status: SessionStatus::Running,
            name: options.name,
            created_at: now,
            expires_at,
            access_url: self.access_url(&session_id),
            backend,
            route: self.route_for(&session_id, &upstream),
            last_error: None,
            restored_from_snapshot: None,
        };

        let stored = session.clone();
        self.store
            .mutate(move |state| {
                state.sessions.insert(stored.session_id.clone(), stored);
            })
            .await?;

        Ok(session)
    }

    /// Stop a session: stop its container (best effort) and drop its route.
    ///
    /// The container and volume survive, only routing and status change.
    pub async fn stop_session(&self, session_id: &str) -> SessionResult<Session> {
        let session = self.get_session(session_id).await?;

        let mut stop_error = None;
        if let SessionBackend::Managed { container_id, .. } = &session.backend {
            if let Err(e) = self.backend.stop_container(container_id, Some(10)).await {
                warn!(session_id = %session_id, error = %e, "failed to stop container");
                stop_error = Some(e.to_string());
            }
        }
        self.router.delete_route(session_id).await?;

        let updated = self
            .store
            .mutate(move |state| {
                state.sessions.get_mut(session_id).map(|s| {
                    s.status = SessionStatus::Stopped;
                    s.last_error = stop_error;
                    s.clone()
                })
            })
            .await?;

        updated.ok_or_else(|| {
            SessionError::not_found("unknown_session", format!("session '{}' not found", session_id))
        })
    }

    /// Delete a session and everything it owns.
    ///
    /// Teardown is best effort and ordered route, container, volume; each
    /// step's result lands in the returned outcome. Deleting a session that
    /// does not exist is a success.
    pub async fn delete_session(&self, session_id: &str) -> SessionResult<DeleteOutcome> {
        let session = self
            .store
            .read(|state| state.sessions.get(session_id).cloned())
            .await;

        let Some(session) = session else {
            return Ok(DeleteOutcome {
                ok: true,
                route: "already_removed".to_string(),
                container: "already_removed".to_string(),
                volume: "already_removed".to_string(),
            });
        };

        let route = match self.router.delete_route(session_id).await {
            Ok(()) => "removed".to_string(),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to deregister route");
                format!("error: {}", e)
            }
        };

        let (container, volume) = match &session.backend {
            SessionBackend::Virtual { .. } => ("skipped".to_string(), "skipped".to_string()),
            SessionBackend::Managed { container_id, volume_id } => {
                let container = match self.backend.remove_container(container_id).await {
                    Ok(()) => "removed".to_string(),
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "failed to remove container");
                        format!("error: {}", e)
                    }
                };
                let volume = match self.backend.remove_volume(volume_id).await {
                    Ok(()) => "removed".to_string(),
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "failed to remove volume");
                        format!("error: {}", e)
                    }
                };
                (container, volume)
            }
        };

        self.store
            .mutate(move |state| {
                state.sessions.remove(session_id);
            })
            .await?;

        Ok(DeleteOutcome {
            ok: true,
            route,
            container,
            volume,
        })
    }

    /// Set or replace a session's display name.
    pub async fn rename_session(&self, session_id: &str, name: &str) -> SessionResult<Session> {
        Self::validate_name(name)?;
        let name = name.to_string();
        let updated = self
            .store
            .mutate(move |state| {
                state.sessions.get_mut(session_id).map(|s| {
                    s.name = Some(name);
                    s.clone()
                })
            })
            .await?;

        updated.ok_or_else(|| {
            SessionError::not_found("unknown_session", format!("session '{}' not found", session_id))
        })
    }

    /// Replace a session's expiry with now + ttl. Any previous TTL is
    /// discarded, extending never stacks.
    pub async fn extend_session_ttl(
        &self,
        session_id: &str,
        ttl_minutes: i64,
    ) -> SessionResult<Session> {
        if ttl_minutes <= 0 {
            return Err(SessionError::validation(
                "invalid_ttl",
                format!("ttl_minutes must be positive, got {}", ttl_minutes),
            ));
        }
        let expires_at = (Utc::now() + Duration::minutes(ttl_minutes)).to_rfc3339();

        let updated = self
            .store
            .mutate(move |state| {
                state.sessions.get_mut(session_id).map(|s| {
                    s.expires_at = Some(expires_at);
                    s.clone()
                })
            })
            .await?;

        updated.ok_or_else(|| {
            SessionError::not_found("unknown_session", format!("session '{}' not found", session_id))
        })
    }

    pub async fn get_session(&self, session_id: &str) -> SessionResult<Session> {
        self.store
            .read(|state| state.sessions.get(session_id).cloned())
            .await
            .ok_or_else(|| {
                SessionError::not_found(
                    "unknown_session",
                    format!("session '{}' not found", session_id),
                )
            })
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        self.store
            .read(|state| state.sessions.values().cloned().collect())
            .await
    }

    /// Copy a session's volume into a new snapshot volume.
    ///
    /// The source container keeps running during the copy; the snapshot is
    /// crash-consistent, not filesystem-quiesced.
    pub async fn create_snapshot(&self, session_id: &str) -> SessionResult<Snapshot> {
        let session = self.get_session(session_id).await?;
        let Some(source_volume) = session.backend.volume_id() else {
            return Err(SessionError::validation(
                "no_volume",
                format!("session '{}' has no volume to snapshot", session_id),
            ));
        };

        let snapshot_id = Self::new_id();
        let short = &snapshot_id[..12];
        let volume_id = format!("webtop-snap-{}", short);

        self.backend.create_volume(&volume_id).await?;
        if let Err(e) = self.backend.copy_volume(source_volume, &volume_id, false).await {
            // A half-copied snapshot volume is worse than none.
            let _ = self.backend.remove_volume(&volume_id).await;
            return Err(e.into());
        }

        let snapshot = Snapshot {
            snapshot_id: snapshot_id.clone(),
            user_id: session.user_id.clone(),
            created_at: Utc::now().to_rfc3339(),
            source_session_id: session.session_id.clone(),
            profile: session.profile,
            backend: SnapshotBackend { volume_id },
        };

        let stored = snapshot.clone();
        self.store
            .mutate(move |state| {
                state.snapshots.insert(stored.snapshot_id.clone(), stored);
            })
            .await?;

        info!(snapshot_id = %snapshot_id, session_id = %session_id, "created snapshot");
        Ok(snapshot)
    }

    /// Start a fresh session seeded from a snapshot's volume.
    ///
    /// Only the snapshot's owner may restore it. The new session's volume is
    /// wiped before seeding so no image default files survive underneath the
    /// snapshot contents.
    pub async fn restore_snapshot(
        &self,
        user_id: &str,
        snapshot_id: &str,
        options: RestoreSnapshotOptions,
    ) -> SessionResult<Session> {
        let snapshot = self.get_snapshot(snapshot_id).await?;
        if snapshot.user_id != user_id {
            return Err(SessionError::Forbidden(format!(
                "snapshot '{}' belongs to another user",
                snapshot_id
            )));
        }
        if let Some(name) = &options.name {
            Self::validate_name(name)?;
        }

        let profile = match options.profile.as_deref() {
            Some(raw) => Self::parse_profile(Some(raw))?,
            None => snapshot.profile,
        };
        let expires_at = self.expiry_from_ttl(options.ttl_minutes)?;
        let session_id = Self::new_id();

        let provisioned = self
            .provision(profile, &session_id, Some(&snapshot.backend.volume_id))
            .await?;

        if let Err(e) = self.router.put_route(&session_id, &provisioned.upstream).await {
            let _ = self.backend.remove_container(&provisioned.container_id).await;
            let _ = self.backend.remove_volume(&provisioned.volume_id).await;
            return Err(e.into());
        }

        let session = Session {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            profile,
            status: SessionStatus::Running,
            name: options.name,
            created_at: Utc::now().to_rfc3339(),
            expires_at,
            access_url: self.access_url(&session_id),
            backend: SessionBackend::Managed {
                container_id: provisioned.container_id,
                volume_id: provisioned.volume_id,
            },
            route: self.route_for(&session_id, &provisioned.upstream),
            last_error: None,
            restored_from_snapshot: Some(snapshot_id.to_string()),
        };

        let stored = session.clone();
        self.store
            .mutate(move |state| {
                state.sessions.insert(stored.session_id.clone(), stored);
            })
            .await?;

        info!(session_id = %session_id, snapshot_id = %snapshot_id, "restored snapshot");
        Ok(session)
    }

    /// Delete a snapshot's volume and metadata. Missing snapshots and
    /// already-removed volumes are both treated as success.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> SessionResult<()> {
        let snapshot = self
            .store
            .read(|state| state.snapshots.get(snapshot_id).cloned())
            .await;

        if let Some(snapshot) = snapshot {
            if let Err(e) = self.backend.remove_volume(&snapshot.backend.volume_id).await {
                warn!(snapshot_id = %snapshot_id, error = %e, "failed to remove snapshot volume");
            }
            self.store
                .mutate(move |state| {
                    state.snapshots.remove(snapshot_id);
                })
                .await?;
        }
        Ok(())
    }

    pub async fn get_snapshot(&self, snapshot_id: &str) -> SessionResult<Snapshot> {
        self.store
            .read(|state| state.snapshots.get(snapshot_id).cloned())
            .await
            .ok_or_else(|| {
                SessionError::not_found(
                    "unknown_snapshot",
                    format!("snapshot '{}' not found", snapshot_id),
                )
            })
    }

    pub async fn list_snapshots(&self, user_id: Option<&str>) -> Vec<Snapshot> {
        self.store
            .read(|state| {
                state
                    .snapshots
                    .values()
                    .filter(|s| user_id.is_none_or(|u| s.user_id == u))
                    .cloned()
                    .collect()
            })
            .await
    }

    /// The route table as the router currently sees it.
    pub async fn get_routes(&self) -> SessionResult<BTreeMap<String, String>> {
        Ok(self.router.list_routes().await?)
    }

    /// Create or replace a user record.
    pub async fn upsert_user(&self, user_id: &str, config: Value) -> SessionResult<User> {
        if user_id.is_empty() {
            return Err(SessionError::validation("missing_field", "user_id is required"));
        }
        let user = User {
            id: user_id.to_string(),
            config,
        };
        let stored = user.clone();
        self.store
            .mutate(move |state| {
                state.users.insert(stored.id.clone(), stored);
            })
            .await?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> SessionResult<User> {
        self.store
            .read(|state| state.users.get(user_id).cloned())
            .await
            .ok_or_else(|| {
                SessionError::not_found("unknown_user", format!("user '{}' not found", user_id))
            })
    }

    pub async fn list_users(&self) -> Vec<User> {
        self.store
            .read(|state| state.users.values().cloned().collect())
            .await
    }

    /// True when the container runtime answers a ping.
    pub async fn runtime_healthy(&self) -> bool {
        self.backend.ping().await.is_ok()
    }
}
