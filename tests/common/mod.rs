//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use std::sync::Mutex;
use tempfile::TempDir;

use webtopd::api::{self, AppState};
use webtopd::container::{ContainerBackend, ContainerConfig, ContainerError, ContainerResult};
use webtopd::router::client::{RouterApi, RouterClientError, RouterClientResult};
use webtopd::router::proxy::{ProxyClient, ProxyTransportError};
use webtopd::router::{RouteDoc, RouterState};
use webtopd::session::{ManagerState, SessionService, SessionServiceConfig};
use webtopd::store::StateStore;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// In-memory container backend recording every runtime interaction.
#[derive(Default)]
pub struct MockBackend {
    pub created: Mutex<Vec<ContainerConfig>>,
    pub stopped: Mutex<Vec<String>>,
    pub removed_containers: Mutex<Vec<String>>,
    pub volumes: Mutex<Vec<String>>,
    pub removed_volumes: Mutex<Vec<String>>,
    /// (source, dest, wipe_dest) per copy.
    pub copies: Mutex<Vec<(String, String, bool)>>,
    pub pulled: Mutex<Vec<String>>,
    pub fail_copy: AtomicBool,
    pub fail_create: AtomicBool,
}

impl MockBackend {
    fn command_failed(command: &str) -> ContainerError {
        ContainerError::CommandFailed {
            command: command.to_string(),
            message: "injected test failure".to_string(),
        }
    }
}

#[async_trait]
impl ContainerBackend for MockBackend {
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::command_failed("create"));
        }
        self.created.lock().unwrap().push(config.clone());
        Ok(format!(
            "ctr-{}",
            config.name.clone().unwrap_or_else(|| "anon".to_string())
        ))
    }

    async fn stop_container(&self, id: &str, _timeout_seconds: Option<u32>) -> ContainerResult<()> {
        self.stopped.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> ContainerResult<()> {
        self.removed_containers.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> ContainerResult<String> {
        self.volumes.lock().unwrap().push(name.to_string());
        Ok(name.to_string())
    }

    async fn remove_volume(&self, name: &str) -> ContainerResult<()> {
        self.removed_volumes.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn copy_volume(&self, source: &str, dest: &str, wipe_dest: bool) -> ContainerResult<()> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(Self::command_failed("copy"));
        }
        self.copies
            .lock()
            .unwrap()
            .push((source.to_string(), dest.to_string(), wipe_dest));
        Ok(())
    }

    async fn resolve_network(&self, logical: &str) -> ContainerResult<String> {
        Ok(format!("compose_{}", logical))
    }

    async fn image_exists(&self, _image: &str) -> ContainerResult<bool> {
        Ok(true)
    }

    async fn pull_image(&self, image: &str) -> ContainerResult<()> {
        self.pulled.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn ping(&self) -> ContainerResult<String> {
        Ok("mock 1.0".to_string())
    }
}

/// In-process router admin API, no HTTP involved.
#[derive(Default)]
pub struct InProcRouter {
    pub routes: Mutex<BTreeMap<String, String>>,
    pub fail: AtomicBool,
}

impl InProcRouter {
    fn check(&self) -> RouterClientResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RouterClientError::Unreachable {
                url: "http://router.test".to_string(),
                message: "injected test failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RouterApi for InProcRouter {
    async fn put_route(&self, session_id: &str, upstream: &str) -> RouterClientResult<()> {
        self.check()?;
        self.routes
            .lock()
            .unwrap()
            .insert(session_id.to_string(), upstream.to_string());
        Ok(())
    }

    async fn delete_route(&self, session_id: &str) -> RouterClientResult<()> {
        self.check()?;
        self.routes.lock().unwrap().remove(session_id);
        Ok(())
    }

    async fn list_routes(&self) -> RouterClientResult<BTreeMap<String, String>> {
        self.check()?;
        Ok(self.routes.lock().unwrap().clone())
    }
}

pub struct ManagerHarness {
    pub service: Arc<SessionService>,
    pub backend: Arc<MockBackend>,
    pub router: Arc<InProcRouter>,
    // Held so the state file outlives the test.
    _dir: TempDir,
}

/// Build a session service wired to mocks, state persisted in a tempdir.
pub async fn test_service() -> ManagerHarness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<StateStore<ManagerState>> =
        Arc::new(StateStore::load(dir.path().join("manager.json")).await);
    let backend = Arc::new(MockBackend::default());
    let router = Arc::new(InProcRouter::default());

    let service = Arc::new(SessionService::new(
        store,
        backend.clone(),
        router.clone(),
        SessionServiceConfig::default(),
    ));

    ManagerHarness {
        service,
        backend,
        router,
        _dir: dir,
    }
}

/// Build the manager's HTTP app on top of mocks.
pub async fn test_app() -> (Router, ManagerHarness) {
    let harness = test_service().await;
    let state = AppState {
        sessions: harness.service.clone(),
        admin_token: ADMIN_TOKEN.to_string(),
    };
    (api::create_app(state), harness)
}

/// Proxy transport that counts calls and replays a canned response.
pub struct CountingProxy {
    pub calls: AtomicUsize,
    pub fail_connect: AtomicBool,
    response_headers: Vec<(String, String)>,
    response_body: String,
}

impl CountingProxy {
    pub fn new(response_body: &str, response_headers: &[(&str, &str)]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            response_headers: response_headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            response_body: response_body.to_string(),
        }
    }
}

#[async_trait]
impl ProxyClient for CountingProxy {
    async fn request(&self, _req: Request<Body>) -> Result<Response<Body>, ProxyTransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ProxyTransportError {
                connect: true,
                message: "connection refused".to_string(),
            });
        }

        let mut builder = Response::builder().status(200);
        for (k, v) in &self.response_headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        Ok(builder.body(Body::from(self.response_body.clone())).unwrap())
    }
}

pub struct RouterHarness {
    pub app: Router,
    pub routes: Arc<StateStore<RouteDoc>>,
    pub proxy: Arc<CountingProxy>,
    _dir: TempDir,
}

/// Build the router app with a counting proxy transport.
pub async fn router_app(proxy: CountingProxy) -> RouterHarness {
    let dir = tempfile::tempdir().unwrap();
    let routes: Arc<StateStore<RouteDoc>> =
        Arc::new(StateStore::load(dir.path().join("routes.json")).await);
    let proxy = Arc::new(proxy);

    let state = RouterState {
        routes: routes.clone(),
        admin_token: ADMIN_TOKEN.to_string(),
        proxy: proxy.clone(),
    };

    RouterHarness {
        app: webtopd::router::create_router(state, "/desktops"),
        routes,
        proxy,
        _dir: dir,
    }
}
