//! Session manager API integration tests.

use std::sync::atomic::Ordering;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{ADMIN_TOKEN, test_app, test_service};
use webtopd::session::StartSessionOptions;

async fn invoke_with_auth(
    app: Router,
    tool: &str,
    args: Value,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .uri("/invoke")
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    let response = app
        .oneshot(
            builder
                .body(Body::from(
                    serde_json::to_string(&json!({ "tool": tool, "arguments": args })).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

async fn invoke(app: Router, tool: &str, args: Value) -> (StatusCode, Value) {
    invoke_with_auth(app, tool, args, None).await
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _harness) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["container_runtime"], "ok");
}

#[tokio::test]
async fn test_start_virtual_session_registers_route() {
    let (app, harness) = test_app().await;

    let (status, body) = invoke(
        app,
        "start_session",
        json!({ "user_id": "alice", "upstream": "http://legacy-host:3000" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let session = &body["result"];
    assert_eq!(session["backend"]["type"], "virtual");
    assert_eq!(session["backend"]["upstream"], "http://legacy-host:3000");
    assert_eq!(session["status"], "running");

    let session_id = session["session_id"].as_str().unwrap();
    let routes = harness.router.routes.lock().unwrap();
    assert_eq!(
        routes.get(session_id).map(String::as_str),
        Some("http://legacy-host:3000")
    );

    // A virtual session must never touch the container runtime.
    assert!(harness.backend.created.lock().unwrap().is_empty());
    assert!(harness.backend.volumes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_start_managed_session_provisions_container() {
    let (app, harness) = test_app().await;

    let (status, body) = invoke(app, "start_session", json!({ "user_id": "alice" })).await;

    assert_eq!(status, StatusCode::OK);
    let session = &body["result"];
    assert_eq!(session["backend"]["type"], "managed");
    assert_eq!(session["profile"], "default");

    let session_id = session["session_id"].as_str().unwrap();
    assert!(
        session["access_url"]
            .as_str()
            .unwrap()
            .contains(&format!("/desktops/{}/", session_id))
    );

    let created = harness.backend.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    let cfg = &created[0];
    assert_eq!(cfg.network.as_deref(), Some("compose_webtop"));
    assert_eq!(cfg.env.get("TZ").map(String::as_str), Some("Etc/UTC"));
    assert_eq!(cfg.env.get("PUID").map(String::as_str), Some("1000"));
    assert_eq!(cfg.volumes.len(), 1);
    assert_eq!(cfg.volumes[0].target, "/config");

    let routes = harness.router.routes.lock().unwrap();
    assert_eq!(
        routes.get(session_id).map(String::as_str),
        session["route"]["upstream"].as_str()
    );
}

#[tokio::test]
async fn test_start_session_windsurf_profile_env() {
    let harness = test_service().await;

    harness
        .service
        .start_session(
            "alice",
            StartSessionOptions {
                profile: Some("windsurf".to_string()),
                ttl_minutes: None,
                upstream: None,
                name: None,
            },
        )
        .await
        .unwrap();

    let created = harness.backend.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(
        created[0].env.get("WINDSURF_INSTALL_MODE").map(String::as_str),
        Some("download")
    );
}

#[tokio::test]
async fn test_start_session_invalid_profile() {
    let (app, _harness) = test_app().await;

    let (status, body) = invoke(
        app,
        "start_session",
        json!({ "user_id": "alice", "profile": "gaming" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_profile");
}

#[tokio::test]
async fn test_unknown_tool_rejected() {
    let (app, _harness) = test_app().await;

    let (status, body) = invoke(app, "reboot_host", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "unknown_tool");
}

#[tokio::test]
async fn test_delete_session_is_idempotent() {
    let (app, harness) = test_app().await;

    let (_, body) = invoke(
        app.clone(),
        "start_session",
        json!({ "user_id": "alice" }),
    )
    .await;
    let session_id = body["result"]["session_id"].as_str().unwrap().to_string();

    let (status, body) = invoke(
        app.clone(),
        "delete_session",
        json!({ "session_id": session_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["ok"], true);
    assert_eq!(body["result"]["route"], "removed");
    assert_eq!(body["result"]["container"], "removed");
    assert_eq!(body["result"]["volume"], "removed");

    assert_eq!(harness.backend.removed_containers.lock().unwrap().len(), 1);
    assert_eq!(harness.backend.removed_volumes.lock().unwrap().len(), 1);
    assert!(harness.router.routes.lock().unwrap().is_empty());

    // Second delete of the same session still succeeds.
    let (status, body) = invoke(
        app,
        "delete_session",
        json!({ "session_id": session_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["ok"], true);
    assert_eq!(body["result"]["route"], "already_removed");
}

#[tokio::test]
async fn test_stop_session_keeps_container_and_volume() {
    let (app, harness) = test_app().await;

    let (_, body) = invoke(
        app.clone(),
        "start_session",
        json!({ "user_id": "alice" }),
    )
    .await;
    let session_id = body["result"]["session_id"].as_str().unwrap().to_string();

    let (status, body) = invoke(
        app,
        "stop_session",
        json!({ "session_id": session_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["status"], "stopped");

    // Route is gone but nothing got destroyed.
    assert!(harness.router.routes.lock().unwrap().is_empty());
    assert_eq!(harness.backend.stopped.lock().unwrap().len(), 1);
    assert!(harness.backend.removed_containers.lock().unwrap().is_empty());
    assert!(harness.backend.removed_volumes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rename_session_validates_length() {
    let (app, _harness) = test_app().await;

    let (_, body) = invoke(
        app.clone(),
        "start_session",
        json!({ "user_id": "alice" }),
    )
    .await;
    let session_id = body["result"]["session_id"].as_str().unwrap().to_string();

    let (status, body) = invoke_with_auth(
        app.clone(),
        "rename_session",
        json!({ "session_id": session_id, "name": "my desktop" }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["name"], "my desktop");

    let (status, body) = invoke_with_auth(
        app,
        "rename_session",
        json!({ "session_id": session_id, "name": "x".repeat(201) }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_name");
}

#[tokio::test]
async fn test_extend_ttl_replaces_expiry() {
    let (app, _harness) = test_app().await;

    let (_, body) = invoke(
        app.clone(),
        "start_session",
        json!({ "user_id": "alice", "ttl_minutes": 600 }),
    )
    .await;
    let session = &body["result"];
    let session_id = session["session_id"].as_str().unwrap().to_string();
    assert_eq!(session["expired"], false);

    let (status, body) = invoke(
        app.clone(),
        "extend_session_ttl",
        json!({ "session_id": session_id, "ttl_minutes": 10 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The new expiry is now + 10 minutes, not stacked on the original TTL.
    let expires_at = body["result"]["expires_at"].as_str().unwrap();
    let expires = chrono::DateTime::parse_from_rfc3339(expires_at).unwrap();
    assert!(expires.with_timezone(&Utc) < Utc::now() + Duration::minutes(20));

    let (status, body) = invoke(
        app.clone(),
        "extend_session_ttl",
        json!({ "session_id": "nope", "ttl_minutes": 10 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_session");

    let (status, body) = invoke(
        app,
        "extend_session_ttl",
        json!({ "session_id": "nope", "ttl_minutes": -5 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_ttl");
}

#[tokio::test]
async fn test_snapshot_and_restore_roundtrip() {
    let (app, harness) = test_app().await;

    let (_, body) = invoke(
        app.clone(),
        "start_session",
        json!({ "user_id": "alice" }),
    )
    .await;
    let session_id = body["result"]["session_id"].as_str().unwrap().to_string();
    let source_volume = body["result"]["backend"]["volume_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = invoke(
        app.clone(),
        "create_snapshot",
        json!({ "session_id": session_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let snapshot = &body["result"];
    let snapshot_id = snapshot["snapshot_id"].as_str().unwrap().to_string();
    let snapshot_volume = snapshot["backend"]["volume_id"].as_str().unwrap().to_string();
    assert!(snapshot_volume.starts_with("webtop-snap-"));
    assert_eq!(snapshot["source_session_id"].as_str().unwrap(), session_id);

    {
        let copies = harness.backend.copies.lock().unwrap();
        // Snapshot copies into a fresh volume, no wipe needed.
        assert_eq!(
            copies.last().unwrap(),
            &(source_volume.clone(), snapshot_volume.clone(), false)
        );
    }

    let (status, body) = invoke(
        app.clone(),
        "restore_snapshot",
        json!({ "user_id": "alice", "snapshot_id": snapshot_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let restored = &body["result"];
    assert_eq!(restored["restored_from_snapshot"].as_str().unwrap(), snapshot_id);
    assert_eq!(restored["backend"]["type"], "managed");
    assert_ne!(restored["session_id"].as_str().unwrap(), session_id);

    {
        let copies = harness.backend.copies.lock().unwrap();
        // Restore wipes the new session volume before seeding it.
        let (src, _dest, wipe) = copies.last().unwrap();
        assert_eq!(src, &snapshot_volume);
        assert!(wipe);
    }

    // Snapshot deletes are idempotent too.
    let (status, _) = invoke_with_auth(
        app.clone(),
        "delete_snapshot",
        json!({ "snapshot_id": snapshot_id }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = invoke_with_auth(
        app,
        "delete_snapshot",
        json!({ "snapshot_id": snapshot_id }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        harness
            .backend
            .removed_volumes
            .lock()
            .unwrap()
            .contains(&snapshot_volume)
    );
}

#[tokio::test]
async fn test_restore_snapshot_of_other_user_forbidden() {
    let (app, _harness) = test_app().await;

    let (_, body) = invoke(
        app.clone(),
        "start_session",
        json!({ "user_id": "alice" }),
    )
    .await;
    let session_id = body["result"]["session_id"].as_str().unwrap().to_string();

    let (_, body) = invoke(
        app.clone(),
        "create_snapshot",
        json!({ "session_id": session_id }),
    )
    .await;
    let snapshot_id = body["result"]["snapshot_id"].as_str().unwrap().to_string();

    let (status, body) = invoke(
        app,
        "restore_snapshot",
        json!({ "user_id": "mallory", "snapshot_id": snapshot_id }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn test_snapshot_copy_failure_removes_half_copied_volume() {
    let (app, harness) = test_app().await;

    let (_, body) = invoke(
        app.clone(),
        "start_session",
        json!({ "user_id": "alice" }),
    )
    .await;
    let session_id = body["result"]["session_id"].as_str().unwrap().to_string();

    harness.backend.fail_copy.store(true, Ordering::SeqCst);

    let (status, body) = invoke(
        app.clone(),
        "create_snapshot",
        json!({ "session_id": session_id }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "docker_copy_failed");

    // The destination volume was created and then cleaned up again.
    let removed = harness.backend.removed_volumes.lock().unwrap();
    assert!(removed.iter().any(|v| v.starts_with("webtop-snap-")));
    drop(removed);

    let (_, body) = invoke(
        app,
        "list_snapshots",
        json!({ "user_id": "alice" }),
    )
    .await;
    assert_eq!(body["result"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_router_failure_rolls_back_managed_start() {
    let (app, harness) = test_app().await;
    harness.router.fail.store(true, Ordering::SeqCst);

    let (status, body) = invoke(app.clone(), "start_session", json!({ "user_id": "alice" })).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "router_unreachable");

    // The container and volume provisioned before the failure are gone.
    assert_eq!(harness.backend.removed_containers.lock().unwrap().len(), 1);
    assert_eq!(harness.backend.removed_volumes.lock().unwrap().len(), 1);

    harness.router.fail.store(false, Ordering::SeqCst);
    let (_, body) = invoke(app, "list_sessions", json!({})).await;
    assert_eq!(body["result"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_admin_tools_require_bearer_token() {
    let (app, _harness) = test_app().await;

    let (status, body) = invoke(app.clone(), "list_users", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_token");

    let (status, body) = invoke_with_auth(app.clone(), "list_users", json!({}), Some("wrong")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, _) = invoke_with_auth(app.clone(), "list_users", json!({}), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);

    // rename_session and delete_snapshot are admin-gated too.
    let (status, body) = invoke(
        app.clone(),
        "rename_session",
        json!({ "session_id": "s", "name": "n" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_token");

    // Route listing is a plain read.
    let (status, _) = invoke(app, "get_routes", json!({})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_user_upsert_and_get() {
    let (app, _harness) = test_app().await;

    let (status, body) = invoke_with_auth(
        app.clone(),
        "upsert_user",
        json!({ "user_id": "alice", "config": { "theme": "dark" } }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["id"], "alice");

    let (status, body) = invoke_with_auth(
        app.clone(),
        "get_user",
        json!({ "user_id": "alice" }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["config"]["theme"], "dark");

    let (status, body) = invoke_with_auth(
        app,
        "get_user",
        json!({ "user_id": "bob" }),
        Some(ADMIN_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_user");
}

#[tokio::test]
async fn test_invoke_without_arguments_field() {
    let (app, _harness) = test_app().await;

    // Tools whose arguments are all optional work with the field omitted.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/invoke")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"tool":"list_sessions"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["result"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_capabilities_lists_tools() {
    let (app, _harness) = test_app().await;

    let (status, body) = invoke(app, "capabilities", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let tools = body["result"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t == "start_session"));
    assert!(tools.iter().any(|t| t == "restore_snapshot"));
    assert!(tools.iter().any(|t| t == "health"));
    assert!(body["result"]["version"].is_string());
    assert_eq!(
        body["result"]["profiles"]["default"]["image"],
        "lscr.io/linuxserver/webtop:ubuntu-xfce"
    );
}

#[tokio::test]
async fn test_health_tool_reports_runtime() {
    let (app, _harness) = test_app().await;

    let (status, body) = invoke(app, "health", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["status"], "ok");
    assert_eq!(body["result"]["container_runtime"], "ok");
}

#[tokio::test]
async fn test_concurrent_starts_both_persisted() {
    let harness = test_service().await;

    let a = harness.service.start_session("alice", StartSessionOptions::default());
    let b = harness.service.start_session("bob", StartSessionOptions::default());
    let (a, b) = tokio::join!(a, b);
    let a = a.unwrap();
    let b = b.unwrap();

    let sessions = harness.service.list_sessions().await;
    assert_eq!(sessions.len(), 2);

    let routes = harness.router.routes.lock().unwrap();
    assert!(routes.contains_key(&a.session_id));
    assert!(routes.contains_key(&b.session_id));
}
