//! HTTP surface of the gateway.
//!
//! The router nests everything under `/api/v1`. Health and the index are
//! public; the session and prompt routes sit behind API-key auth. CORS and
//! request tracing wrap the whole app.

mod auth;
mod error;
mod prompt;
mod sessions;
mod sse;
mod types;

pub use error::ApiError;

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::{middleware, Json, Router};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::manager::SessionManager;

use types::HealthResponse;

/// State shared by every handler.
pub struct AppState {
    pub config: Config,
    pub manager: SessionManager,
}

/// Assemble the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    let protected = Router::new()
        .nest("/sessions", sessions::routes())
        .nest("/prompt", prompt::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ));

    let api_v1 = Router::new().route("/health", get(health)).merge(protected);

    Router::new()
        .route("/", get(index))
        .nest("/api/v1", api_v1)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the server until Ctrl+C or SIGTERM, then close every session.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let manager = SessionManager::new(config.agent.clone(), config.session_timeout);
    manager.start_sweeper();

    let state = Arc::new(AppState {
        config: config.clone(),
        manager: manager.clone(),
    });
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    info!("Server stopped");
    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ]);

    if config.cors_origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        service: "claude-relay",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "claude-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/api/v1/health",
        "endpoints": {
            "health": "GET /api/v1/health",
            "prompt": "POST /api/v1/prompt",
            "promptStream": "POST /api/v1/prompt/stream",
            "sessions": "GET|POST /api/v1/sessions",
            "session": "GET|DELETE /api/v1/sessions/:id",
            "messages": "POST /api/v1/sessions/:id/messages",
            "messagesStream": "POST /api/v1/sessions/:id/messages/stream",
            "resume": "POST /api/v1/sessions/resume",
        },
    }))
}
