//! Session lifecycle and message endpoints.
//!
//! Routes (mounted under `/api/v1/sessions`):
//! - `POST /` create a session
//! - `GET /` list sessions
//! - `POST /resume` create a session bound to an existing CLI conversation
//! - `GET /:id` session detail
//! - `DELETE /:id` close a session
//! - `POST /:id/messages` send a message, buffer the full exchange
//! - `POST /:id/messages/stream` send a message, stream events over SSE

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use tracing::info;
use uuid::Uuid;

use crate::manager::{ManagerError, SessionSnapshot};
use crate::session::{SessionOptions, StreamOptions};

use super::error::ApiError;
use super::sse;
use super::types::{
    CloseSessionResponse, CreateSessionResponse, ListSessionsResponse, MessageRequest,
    MessageResponse, ResumeRequest, ResumeSessionResponse, SessionListItem,
};
use super::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_session).get(list_sessions))
        .route("/resume", post(resume_session))
        .route("/:session_id", get(get_session).delete(close_session))
        .route("/:session_id/messages", post(send_message))
        .route("/:session_id/messages/stream", post(stream_message))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    options: Option<Json<SessionOptions>>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let Json(options) = options.unwrap_or_default();
    let snapshot = state.manager.create(options);
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: snapshot.session_id,
            status: "created",
            created_at: snapshot.created_at,
        }),
    )
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ListSessionsResponse> {
    let sessions = state
        .manager
        .list()
        .into_iter()
        .map(SessionListItem::from)
        .collect();
    Json(ListSessionsResponse { sessions })
}

async fn resume_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResumeRequest>,
) -> Result<(StatusCode, Json<ResumeSessionResponse>), ApiError> {
    if body.cli_session_id.is_empty() {
        return Err(ApiError::bad_request("cliSessionId is required"));
    }

    let snapshot = state
        .manager
        .resume(body.cli_session_id.clone(), body.options);
    Ok((
        StatusCode::CREATED,
        Json(ResumeSessionResponse {
            session_id: snapshot.session_id,
            cli_session_id: body.cli_session_id,
            status: "resumed",
            created_at: snapshot.created_at,
        }),
    ))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state
        .manager
        .snapshot(session_id)
        .ok_or(ManagerError::NotFound)?;
    Ok(Json(snapshot))
}

async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CloseSessionResponse>, ApiError> {
    if !state.manager.close(session_id).await {
        return Err(ManagerError::NotFound.into());
    }
    Ok(Json(CloseSessionResponse {
        message: "Session closed",
        session_id,
    }))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if body.message.is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }

    let (session, guard) = state.manager.begin_exchange(session_id)?;
    info!(
        session_id = %session_id,
        message_len = body.message.len(),
        "Processing session message"
    );

    let mut stream = {
        let mut session = session.lock().await;
        session.send(body.message)?;
        session.stream(StreamOptions {
            filter: body.filter,
        })?
    };

    let mut events = Vec::new();
    let mut result = None;
    let mut is_error = false;
    while let Some(item) = stream.next().await {
        let event = item?;
        if let Some(id) = event.init_session_id() {
            state.manager.set_cli_session_id(session_id, id);
        }
        if let Some(result_event) = event.as_result() {
            is_error = result_event.is_error;
            if result_event.subtype == "success" {
                result = result_event.result.clone();
            }
        }
        events.push(event);
    }
    drop(stream);
    drop(guard);

    let cli_session_id = session.lock().await.agent_session_id();
    Ok(Json(MessageResponse {
        session_id,
        cli_session_id,
        events,
        result,
        is_error,
    }))
}

async fn stream_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<MessageRequest>,
) -> Result<Response, ApiError> {
    if body.message.is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }

    let (session, guard) = state.manager.begin_exchange(session_id)?;
    info!(
        session_id = %session_id,
        message_len = body.message.len(),
        "Streaming session message"
    );

    let stream = {
        let mut session = session.lock().await;
        session.send(body.message)?;
        session.stream(StreamOptions {
            filter: body.filter,
        })?
    };

    // Mirror the CLI conversation id into the registry as soon as the
    // init event passes through.
    let manager = state.manager.clone();
    let stream = stream.inspect(move |item| {
        if let Ok(event) = item {
            if let Some(id) = event.init_session_id() {
                manager.set_cli_session_id(session_id, id);
            }
        }
    });

    Ok(sse::session_frames(stream, Some(guard)).into_response())
}
