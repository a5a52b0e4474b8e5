//! HTTP and WebSocket proxying to session upstreams.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri, header},
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, warn};

use super::RouterState;

/// Headers that are connection-scoped and must never cross the proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Upgrade-negotiation headers stripped on the plain-HTTP path so a forwarded
/// request can never trigger an accidental 101.
const WEBSOCKET_HEADERS: [HeaderName; 4] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_PROTOCOL,
    header::SEC_WEBSOCKET_EXTENSIONS,
];

/// Transport failure while forwarding a request.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProxyTransportError {
    pub connect: bool,
    pub message: String,
}

/// Transport used for forwarded HTTP requests. A trait so tests can count or
/// fail calls without a live upstream.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn request(&self, req: Request<Body>) -> Result<Response<Body>, ProxyTransportError>;
}

/// Production transport backed by hyper's legacy pooled client.
pub struct HyperProxyClient {
    client: Client<HttpConnector, Body>,
}

impl HyperProxyClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HyperProxyClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyClient for HyperProxyClient {
    async fn request(&self, req: Request<Body>) -> Result<Response<Body>, ProxyTransportError> {
        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| ProxyTransportError {
                connect: e.is_connect(),
                message: e.to_string(),
            })?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

// Proxy-level failures are body-less so they can never masquerade as
// upstream content.
fn status_only(status: StatusCode) -> Response<Body> {
    status.into_response()
}

fn is_websocket_path(path: &str) -> bool {
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    last == "websocket" || last == "websockets"
}

/// Entry point for `/{base_path}/{session_id}` without a trailing path.
pub async fn proxy_session_root(
    State(state): State<RouterState>,
    Path(session_id): Path<String>,
    req: Request<Body>,
) -> Response<Body> {
    proxy_session_inner(state, session_id, String::new(), req).await
}

/// Entry point for `/{base_path}/{session_id}/{*path}`.
pub async fn proxy_session(
    State(state): State<RouterState>,
    Path((session_id, path)): Path<(String, String)>,
    req: Request<Body>,
) -> Response<Body> {
    proxy_session_inner(state, session_id, path, req).await
}

/// Look up the route, then hand off to the HTTP or WebSocket relay.
///
/// The route lookup happens before any upstream contact; an unknown session
/// never opens a connection. WebSocket upgrades are honored only on the
/// `websocket`/`websockets` sub-path; everywhere else the upgrade headers
/// are stripped and the request forwarded as plain HTTP.
async fn proxy_session_inner(
    state: RouterState,
    session_id: String,
    path: String,
    req: Request<Body>,
) -> Response<Body> {
    use axum::extract::FromRequestParts;

    let upstream = state
        .routes
        .read(|doc| doc.routes.get(&session_id).cloned())
        .await;

    let Some(upstream) = upstream else {
        warn!(session_id = %session_id, "no route for session");
        return status_only(StatusCode::NOT_FOUND);
    };

    // `WebSocketUpgrade` is built by hand so the same route serves both
    // upgrade and plain-HTTP traffic; requests to the sub-path without
    // upgrade headers fall through to the HTTP relay.
    let (mut parts, body) = req.into_parts();
    if is_websocket_path(&path) {
        if let Ok(ws) = WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            return relay_websocket(ws, &upstream, &parts.headers).await;
        }
    }

    forward_http(&state, &upstream, &path, Request::from_parts(parts, body)).await
}

/// Forward one HTTP request to the upstream and relay the response.
async fn forward_http(
    state: &RouterState,
    upstream: &str,
    path: &str,
    mut req: Request<Body>,
) -> Response<Body> {
    let query = req.uri().query().unwrap_or("");
    let mut target_uri = format!("{}/{}", upstream.trim_end_matches('/'), path);
    if !query.is_empty() {
        target_uri.push('?');
        target_uri.push_str(query);
    }

    debug!(target = %target_uri, "proxying request");

    let uri: Uri = match target_uri.parse() {
        Ok(uri) => uri,
        Err(e) => {
            error!(target = %target_uri, "invalid target URI: {}", e);
            return status_only(StatusCode::BAD_GATEWAY);
        }
    };
    *req.uri_mut() = uri;

    for name in HOP_BY_HOP.iter().chain(WEBSOCKET_HEADERS.iter()) {
        req.headers_mut().remove(name);
    }

    // The upstream body gets re-framed on the way back, so any negotiated
    // compression would produce a Content-Encoding we cannot honor.
    req.headers_mut().insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("identity"),
    );

    if let Some(authority) = req.uri().authority() {
        match HeaderValue::from_str(authority.as_str()) {
            Ok(value) => {
                req.headers_mut().insert(header::HOST, value);
            }
            Err(e) => {
                error!(authority = %authority, "invalid Host header value: {}", e);
                return status_only(StatusCode::BAD_GATEWAY);
            }
        }
    }

    let mut response = match state.proxy.request(req).await {
        Ok(response) => response,
        Err(e) if e.connect => {
            warn!(upstream = %upstream, "upstream connect failed: {}", e);
            return status_only(StatusCode::BAD_GATEWAY);
        }
        Err(e) => {
            error!(upstream = %upstream, "proxy request failed: {}", e);
            return status_only(StatusCode::BAD_GATEWAY);
        }
    };

    for name in &HOP_BY_HOP {
        response.headers_mut().remove(name);
    }
    // The relayed body's framing is ours, not the upstream's.
    response.headers_mut().remove(header::CONTENT_ENCODING);
    response.headers_mut().remove(header::CONTENT_LENGTH);

    response
}

/// Bridge the client connection to the upstream desktop's WebSocket.
///
/// The upstream connection is opened first, so a dead upstream fails the
/// handshake with a 502 instead of accepting a socket only to close it.
async fn relay_websocket(
    ws: WebSocketUpgrade,
    upstream: &str,
    client_headers: &HeaderMap,
) -> Response<Body> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let ws_base = if let Some(rest) = upstream.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = upstream.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        upstream.to_string()
    };
    let target_url = format!("{}/websocket", ws_base.trim_end_matches('/'));
    debug!(target = %target_url, "connecting upstream websocket");

    let mut request = match target_url.clone().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            error!(target = %target_url, "invalid upstream websocket URL: {}", e);
            return status_only(StatusCode::BAD_GATEWAY);
        }
    };
    // Session auth and origin checks happen upstream.
    for name in [header::COOKIE, header::ORIGIN, header::SEC_WEBSOCKET_PROTOCOL] {
        if let Some(value) = client_headers.get(&name) {
            request.headers_mut().insert(name, value.clone());
        }
    }

    let (upstream_socket, handshake) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!(target = %target_url, "upstream websocket connect failed: {}", e);
            return status_only(StatusCode::BAD_GATEWAY);
        }
    };

    // Accept the client with whatever subprotocol the upstream settled on.
    let negotiated = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let ws = match negotiated {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    ws.on_upgrade(move |client_socket| pump_websocket(client_socket, upstream_socket))
}

type UpstreamSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Run both relay directions until either side closes or errors.
async fn pump_websocket(client_socket: axum::extract::ws::WebSocket, upstream_socket: UpstreamSocket) {
    use axum::extract::ws::Message as AxumMessage;
    use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

    let (mut upstream_write, mut upstream_read) = upstream_socket.split();
    let (mut client_write, mut client_read) = client_socket.split();

    let client_to_upstream = async {
        while let Some(msg) = client_read.next().await {
            let forward = match msg {
                Ok(AxumMessage::Text(text)) => TungsteniteMessage::Text(text.to_string().into()),
                Ok(AxumMessage::Binary(data)) => TungsteniteMessage::Binary(data.to_vec().into()),
                Ok(AxumMessage::Ping(data)) => TungsteniteMessage::Ping(data.to_vec().into()),
                Ok(AxumMessage::Pong(data)) => TungsteniteMessage::Pong(data.to_vec().into()),
                Ok(AxumMessage::Close(_)) => break,
                Err(_) => break,
            };
            if upstream_write.send(forward).await.is_err() {
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(msg) = upstream_read.next().await {
            let forward = match msg {
                Ok(TungsteniteMessage::Text(text)) => {
                    AxumMessage::Text(text.to_string().into())
                }
                Ok(TungsteniteMessage::Binary(data)) => {
                    AxumMessage::Binary(data.to_vec().into())
                }
                Ok(TungsteniteMessage::Ping(data)) => AxumMessage::Ping(data.to_vec().into()),
                Ok(TungsteniteMessage::Pong(data)) => AxumMessage::Pong(data.to_vec().into()),
                Ok(TungsteniteMessage::Close(_)) => break,
                Ok(TungsteniteMessage::Frame(_)) => continue,
                Err(_) => break,
            };
            if client_write.send(forward).await.is_err() {
                break;
            }
        }
    };

    // Either side closing tears down the whole relay.
    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
}
