//! API key authentication.
//!
//! Protected routes accept either header:
//! - `X-API-Key: <key>`
//! - `Authorization: Bearer <key>`
//!
//! When no keys are configured and the server runs in dev mode, the check
//! is skipped entirely.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::ApiError;
use super::AppState;

/// Pull the client's key out of the request headers. `X-API-Key` wins over
/// the bearer token when both are present.
fn provided_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
}

/// Middleware guarding `/api/v1/sessions/*` and `/api/v1/prompt/*`.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let config = &state.config;
    if config.api_keys.is_empty() && config.dev_mode {
        return next.run(request).await;
    }

    let Some(key) = provided_key(request.headers()) else {
        return ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Missing API key. Provide X-API-Key header or Authorization: Bearer <key>",
        )
        .into_response();
    };

    if !config.api_keys.iter().any(|k| k == &key) {
        return ApiError::new(StatusCode::FORBIDDEN, "Invalid API key").into_response();
    }

    next.run(request).await
}
