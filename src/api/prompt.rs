//! One-shot prompt endpoints.
//!
//! Routes (mounted under `/api/v1/prompt`):
//! - `POST /` run a prompt to completion, with retry on transient failures
//! - `POST /stream` run a prompt and stream its events over SSE

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tracing::info;

use crate::prompt::PromptResult;
use crate::retry;
use crate::session::{Session, StreamOptions};

use super::error::ApiError;
use super::sse;
use super::types::PromptRequest;
use super::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(run_prompt))
        .route("/stream", post(stream_prompt))
}

async fn run_prompt(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PromptRequest>,
) -> Result<Json<PromptResult>, ApiError> {
    if body.message.is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }

    let config = match &body.retry {
        Some(overrides) => state.config.retry.merged(overrides),
        None => state.config.retry.clone(),
    };
    info!(message_len = body.message.len(), "Processing one-shot prompt");

    let result =
        retry::prompt_with_retry(&state.config.agent, &body.message, &body.options, &config)
            .await?;
    Ok(Json(result))
}

async fn stream_prompt(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PromptRequest>,
) -> Result<Response, ApiError> {
    if body.message.is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }
    info!(message_len = body.message.len(), "Streaming one-shot prompt");

    // The stream owns the process; the transient session itself can go.
    let mut session = Session::new(state.config.agent.clone(), body.options);
    session.send(body.message)?;
    let stream = session.stream(StreamOptions::default())?;

    Ok(sse::session_frames(stream, None).into_response())
}
