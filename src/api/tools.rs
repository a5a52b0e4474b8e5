//! Tool invocation endpoint.
//!
//! Every session manager operation is exposed as a named tool through a
//! single `POST /invoke` endpoint taking `{ "tool": ..., "arguments": {...} }`.
//! Administrative tools additionally require the manager's bearer token.

use axum::{Json, extract::State, http::HeaderMap};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::require_bearer;
use crate::session::{RestoreSnapshotOptions, Session, StartSessionOptions};

use super::error::ApiError;
use super::state::AppState;

/// Tools only the operator may call.
const ADMIN_TOOLS: [&str; 5] = [
    "rename_session",
    "delete_snapshot",
    "upsert_user",
    "get_user",
    "list_users",
];

/// All tools the manager answers to, reported by `capabilities`.
const ALL_TOOLS: [&str; 18] = [
    "start_session",
    "stop_session",
    "delete_session",
    "rename_session",
    "extend_session_ttl",
    "get_session",
    "list_sessions",
    "create_snapshot",
    "restore_snapshot",
    "delete_snapshot",
    "get_snapshot",
    "list_snapshots",
    "get_routes",
    "upsert_user",
    "get_user",
    "list_users",
    "capabilities",
    "health",
];

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, ApiError> {
    // An omitted `arguments` field deserializes as null; tools whose
    // arguments are all optional still accept that.
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| ApiError::bad_request("invalid_args", format!("invalid arguments: {}", e)))
}

/// Serialize a session, adding the derived `expired` flag.
fn session_json(session: &Session) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(session).map_err(|e| ApiError::Internal(e.into()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("expired".to_string(), json!(session.is_expired(Utc::now())));
    }
    Ok(value)
}

fn ok(result: Value) -> Json<Value> {
    Json(json!({ "ok": true, "result": result }))
}

#[derive(Debug, Deserialize)]
struct StartSessionArgs {
    user_id: String,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    ttl_minutes: Option<i64>,
    #[serde(default)]
    upstream: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionIdArgs {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct RenameArgs {
    session_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExtendTtlArgs {
    session_id: String,
    ttl_minutes: i64,
}

#[derive(Debug, Deserialize)]
struct UserFilterArgs {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestoreSnapshotArgs {
    user_id: String,
    snapshot_id: String,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    ttl_minutes: Option<i64>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotIdArgs {
    snapshot_id: String,
}

#[derive(Debug, Deserialize)]
struct UpsertUserArgs {
    user_id: String,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
struct UserIdArgs {
    user_id: String,
}

/// POST /invoke: dispatch one tool call.
pub async fn invoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InvokeRequest>,
) -> Result<Json<Value>, ApiError> {
    if ADMIN_TOOLS.contains(&body.tool.as_str()) {
        require_bearer(&headers, &state.admin_token)?;
    }

    let sessions = &state.sessions;
    match body.tool.as_str() {
        "start_session" => {
            let args: StartSessionArgs = parse_args(body.arguments)?;
            let session = sessions
                .start_session(
                    &args.user_id,
                    StartSessionOptions {
                        profile: args.profile,
                        ttl_minutes: args.ttl_minutes,
                        upstream: args.upstream,
                        name: args.name,
                    },
                )
                .await?;
            Ok(ok(session_json(&session)?))
        }
        "stop_session" => {
            let args: SessionIdArgs = parse_args(body.arguments)?;
            let session = sessions.stop_session(&args.session_id).await?;
            Ok(ok(session_json(&session)?))
        }
        "delete_session" => {
            let args: SessionIdArgs = parse_args(body.arguments)?;
            let outcome = sessions.delete_session(&args.session_id).await?;
            Ok(ok(serde_json::to_value(outcome).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "rename_session" => {
            let args: RenameArgs = parse_args(body.arguments)?;
            let session = sessions.rename_session(&args.session_id, &args.name).await?;
            Ok(ok(session_json(&session)?))
        }
        "extend_session_ttl" => {
            let args: ExtendTtlArgs = parse_args(body.arguments)?;
            let session = sessions
                .extend_session_ttl(&args.session_id, args.ttl_minutes)
                .await?;
            Ok(ok(session_json(&session)?))
        }
        "get_session" => {
            let args: SessionIdArgs = parse_args(body.arguments)?;
            let session = sessions.get_session(&args.session_id).await?;
            Ok(ok(session_json(&session)?))
        }
        "list_sessions" => {
            let args: UserFilterArgs = parse_args(body.arguments)?;
            let mut out = Vec::new();
            for session in sessions.list_sessions().await {
                if args
                    .user_id
                    .as_deref()
                    .is_none_or(|u| session.user_id == u)
                {
                    out.push(session_json(&session)?);
                }
            }
            Ok(ok(Value::Array(out)))
        }
        "create_snapshot" => {
            let args: SessionIdArgs = parse_args(body.arguments)?;
            let snapshot = sessions.create_snapshot(&args.session_id).await?;
            Ok(ok(serde_json::to_value(snapshot).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "restore_snapshot" => {
            let args: RestoreSnapshotArgs = parse_args(body.arguments)?;
            let session = sessions
                .restore_snapshot(
                    &args.user_id,
                    &args.snapshot_id,
                    RestoreSnapshotOptions {
                        profile: args.profile,
                        ttl_minutes: args.ttl_minutes,
                        name: args.name,
                    },
                )
                .await?;
            Ok(ok(session_json(&session)?))
        }
        "delete_snapshot" => {
            let args: SnapshotIdArgs = parse_args(body.arguments)?;
            sessions.delete_snapshot(&args.snapshot_id).await?;
            Ok(ok(json!({ "ok": true })))
        }
        "get_snapshot" => {
            let args: SnapshotIdArgs = parse_args(body.arguments)?;
            let snapshot = sessions.get_snapshot(&args.snapshot_id).await?;
            Ok(ok(serde_json::to_value(snapshot).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "list_snapshots" => {
            let args: UserFilterArgs = parse_args(body.arguments)?;
            let snapshots = sessions.list_snapshots(args.user_id.as_deref()).await;
            Ok(ok(serde_json::to_value(snapshots).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "get_routes" => {
            let routes = sessions.get_routes().await?;
            Ok(ok(serde_json::to_value(routes).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "upsert_user" => {
            let args: UpsertUserArgs = parse_args(body.arguments)?;
            let user = sessions.upsert_user(&args.user_id, args.config).await?;
            Ok(ok(serde_json::to_value(user).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "get_user" => {
            let args: UserIdArgs = parse_args(body.arguments)?;
            let user = sessions.get_user(&args.user_id).await?;
            Ok(ok(serde_json::to_value(user).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "list_users" => {
            let users = sessions.list_users().await;
            Ok(ok(serde_json::to_value(users).map_err(|e| ApiError::Internal(e.into()))?))
        }
        "health" => {
            let runtime = if sessions.runtime_healthy().await { "ok" } else { "unreachable" };
            Ok(ok(json!({ "status": "ok", "container_runtime": runtime })))
        }
        "capabilities" => {
            let cfg = sessions.config();
            Ok(ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "tools": ALL_TOOLS,
                "profiles": {
                    "default": { "image": cfg.default_image },
                    "windsurf": { "image": cfg.windsurf.image },
                },
            })))
        }
        other => Err(ApiError::bad_request(
            "unknown_tool",
            format!("unknown tool '{}'", other),
        )),
    }
}
