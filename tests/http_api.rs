//! Integration tests for the HTTP API.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use claude_relay::api::{self, AppState};
use claude_relay::config::Config;
use claude_relay::manager::SessionManager;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

fn test_app(config: Config) -> (Router, SessionManager) {
    let manager = SessionManager::new(config.agent.clone(), config.session_timeout);
    let state = Arc::new(AppState {
        config,
        manager: manager.clone(),
    });
    (api::build_router(state), manager)
}

/// App with no API keys in dev mode, so auth is skipped.
fn dev_app() -> Router {
    test_app(Config::new("claude-agent-not-spawned")).0
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_session(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(post_json("/api/v1/sessions", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "created");
    json["sessionId"].as_str().unwrap().to_string()
}

// ── Meta endpoints ────────────────────────────────────────────────

#[tokio::test]
async fn index_lists_the_endpoints() {
    let app = dev_app();

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["name"], "claude-relay");
    assert!(json["endpoints"]["sessions"].is_string());
}

#[tokio::test]
async fn health_is_public() {
    let mut config = Config::new("claude-agent-not-spawned");
    config.api_keys = vec!["secret-key".to_string()];
    let (app, _) = test_app(config);

    let response = app.oneshot(get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "claude-relay");
    assert!(json["version"].is_string());
}

// ── Authentication ────────────────────────────────────────────────

fn keyed_app() -> Router {
    let mut config = Config::new("claude-agent-not-spawned");
    config.api_keys = vec!["secret-key".to_string()];
    test_app(config).0
}

#[tokio::test]
async fn missing_api_key_is_unauthorized() {
    let app = keyed_app();

    let response = app.oneshot(get("/api/v1/sessions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Missing API key"));
    assert_eq!(json["status"], 401);
}

#[tokio::test]
async fn wrong_api_key_is_forbidden() {
    let app = keyed_app();

    let response = app
        .oneshot(
            Request::get("/api/v1/sessions")
                .header("x-api-key", "nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Invalid API key");
}

#[tokio::test]
async fn bearer_token_is_accepted() {
    let app = keyed_app();

    let response = app
        .oneshot(
            Request::get("/api/v1/sessions")
                .header("authorization", "Bearer secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn dev_mode_without_keys_skips_auth() {
    let app = dev_app();

    let response = app.oneshot(get("/api/v1/sessions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["sessions"], serde_json::json!([]));
}

// ── Session lifecycle ─────────────────────────────────────────────

#[tokio::test]
async fn session_lifecycle_over_http() {
    let app = dev_app();
    let id = create_session(&app).await;

    let response = app.clone().oneshot(get("/api/v1/sessions")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["sessions"][0]["id"], id.as_str());
    assert_eq!(json["sessions"][0]["status"], "idle");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/sessions/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["sessionId"], id.as_str());
    assert_eq!(json["cliSessionId"], Value::Null);

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/api/v1/sessions/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Session closed");

    let response = app
        .oneshot(get(&format!("/api/v1/sessions/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = dev_app();

    let response = app
        .oneshot(get(&format!("/api/v1/sessions/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Session not found");
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn invalid_session_id_is_rejected() {
    let app = dev_app();

    let response = app
        .oneshot(get("/api/v1/sessions/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resume_requires_the_conversation_id() {
    let app = dev_app();

    let response = app
        .oneshot(post_json("/api/v1/sessions/resume", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "cliSessionId is required");
}

#[tokio::test]
async fn resume_binds_the_conversation() {
    let app = dev_app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/sessions/resume",
            r#"{"cliSessionId":"sess-9"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "resumed");
    assert_eq!(json["cliSessionId"], "sess-9");

    let response = app.oneshot(get("/api/v1/sessions")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["sessions"][0]["cliSessionId"], "sess-9");
}

// ── Message validation ────────────────────────────────────────────

#[tokio::test]
async fn message_requires_text() {
    let app = dev_app();
    let id = create_session(&app).await;

    let response = app
        .oneshot(post_json(&format!("/api/v1/sessions/{id}/messages"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "message is required");
}

#[tokio::test]
async fn message_to_unknown_session_is_not_found() {
    let app = dev_app();

    let response = app
        .oneshot(post_json(
            &format!("/api/v1/sessions/{}/messages", Uuid::new_v4()),
            r#"{"message":"hi"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn busy_session_conflicts_over_http() {
    let (app, manager) = test_app(Config::new("claude-agent-not-spawned"));
    let id = create_session(&app).await;
    let uuid = Uuid::parse_str(&id).unwrap();

    let (_session, _guard) = manager.begin_exchange(uuid).unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/api/v1/sessions/{id}/messages"),
            r#"{"message":"hi"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Session is busy processing another request");
    assert_eq!(json["status"], 409);
}

#[tokio::test]
async fn prompt_requires_a_message() {
    let app = dev_app();

    let response = app
        .oneshot(post_json("/api/v1/prompt", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "message is required");
}

// ── Full exchanges against a scripted agent ───────────────────────

#[cfg(unix)]
mod exchanges {
    use super::*;

    const EXCHANGE_SCRIPT: &str = r#"#!/bin/sh
echo '{"type":"system","subtype":"init","session_id":"sess-http","uuid":"u1"}'
echo '{"type":"assistant","session_id":"sess-http","uuid":"u2","message":{"content":[{"type":"text","text":"hello there"}]}}'
echo '{"type":"result","subtype":"success","session_id":"sess-http","uuid":"u3","result":"all done","is_error":false}'
"#;

    const FAILED_SCRIPT: &str = r#"#!/bin/sh
echo '{"type":"system","subtype":"init","session_id":"sess-http","uuid":"u1"}'
echo '{"type":"result","subtype":"error_during_execution","session_id":"sess-http","uuid":"u2","is_error":true,"errors":["boom"]}'
"#;

    const BROKEN_SCRIPT: &str = "#!/bin/sh\nexit 1\n";

    fn app_for_script(script: &str) -> (tempfile::TempDir, Router) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("fake-agent.sh");
        std::fs::write(&path, script).expect("write fake agent script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("mark fake agent script executable");

        let config = Config::new(path.to_string_lossy().into_owned());
        let (app, _) = test_app(config);
        (dir, app)
    }

    #[tokio::test]
    async fn send_message_returns_the_buffered_exchange() {
        let (_dir, app) = app_for_script(EXCHANGE_SCRIPT);
        let id = create_session(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/sessions/{id}/messages"),
                r#"{"message":"hi"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["sessionId"], id.as_str());
        assert_eq!(json["cliSessionId"], "sess-http");
        assert_eq!(json["events"].as_array().unwrap().len(), 3);
        assert_eq!(json["result"], "all done");
        assert_eq!(json["isError"], false);

        // The exchange recorded the CLI conversation id and went back
        // to idle.
        let response = app
            .oneshot(get(&format!("/api/v1/sessions/{id}")))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["cliSessionId"], "sess-http");
        assert_eq!(json["status"], "idle");
    }

    #[tokio::test]
    async fn failed_result_is_reported_not_thrown() {
        let (_dir, app) = app_for_script(FAILED_SCRIPT);
        let id = create_session(&app).await;

        let response = app
            .oneshot(post_json(
                &format!("/api/v1/sessions/{id}/messages"),
                r#"{"message":"hi"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["isError"], true);
        assert!(json.get("result").is_none());
        assert_eq!(json["events"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn agent_failure_maps_to_bad_gateway() {
        let (_dir, app) = app_for_script(BROKEN_SCRIPT);
        let id = create_session(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/sessions/{id}/messages"),
                r#"{"message":"hi"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let json = body_json(response).await;
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("without a result event"));
        assert_eq!(json["status"], 502);

        // The failed exchange must not wedge the session.
        let response = app
            .oneshot(get(&format!("/api/v1/sessions/{id}")))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "idle");
    }

    #[tokio::test]
    async fn message_stream_emits_sse_frames() {
        let (_dir, app) = app_for_script(EXCHANGE_SCRIPT);
        let id = create_session(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/sessions/{id}/messages/stream"),
                r#"{"message":"hi"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));

        let body = body_text(response).await;
        assert!(body.contains("event: system"), "body: {body}");
        assert!(body.contains("event: result"), "body: {body}");
        assert!(body.contains("[DONE]"), "body: {body}");

        let response = app
            .oneshot(get(&format!("/api/v1/sessions/{id}")))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["cliSessionId"], "sess-http");
        assert_eq!(json["status"], "idle");
    }

    #[tokio::test]
    async fn prompt_returns_the_final_result() {
        let (_dir, app) = app_for_script(EXCHANGE_SCRIPT);

        let response = app
            .oneshot(post_json("/api/v1/prompt", r#"{"message":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["result"], "all done");
        assert_eq!(json["cliSessionId"], "sess-http");
        assert_eq!(json["isError"], false);
    }

    #[tokio::test]
    async fn prompt_stream_emits_sse_frames() {
        let (_dir, app) = app_for_script(EXCHANGE_SCRIPT);

        let response = app
            .oneshot(post_json("/api/v1/prompt/stream", r#"{"message":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        assert!(body.contains("event: result"), "body: {body}");
        assert!(body.contains("[DONE]"), "body: {body}");
    }
}
