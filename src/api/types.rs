//! Request and response bodies for the HTTP API.
//!
//! All wire names are camelCase. One historical quirk is kept on purpose:
//! the session listing labels the gateway id `id` while the detail endpoint
//! labels it `sessionId`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::AgentEvent;
use crate::manager::{SessionSnapshot, SessionStatus};
use crate::retry::RetryOverrides;
use crate::session::SessionOptions;

// ── Sessions ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListItem {
    pub id: Uuid,
    pub cli_session_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl From<SessionSnapshot> for SessionListItem {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.session_id,
            cli_session_id: snapshot.cli_session_id,
            status: snapshot.status,
            created_at: snapshot.created_at,
            last_activity: snapshot.last_activity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    /// Agent-assigned conversation id from a previous session's `init`
    /// event or prompt result.
    #[serde(default)]
    pub cli_session_id: String,
    #[serde(flatten)]
    pub options: SessionOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSessionResponse {
    pub session_id: Uuid,
    pub cli_session_id: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSessionResponse {
    pub message: &'static str,
    pub session_id: Uuid,
}

// ── Messages ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default)]
    pub message: String,
    /// Drop low-signal events (init chatter, bare tool results) from the
    /// response or stream.
    #[serde(default)]
    pub filter: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub session_id: Uuid,
    pub cli_session_id: Option<String>,
    pub events: Vec<AgentEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub is_error: bool,
}

// ── Prompt ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub options: SessionOptions,
    /// Per-request retry overrides, merged over the server defaults.
    #[serde(default)]
    pub retry: Option<RetryOverrides>,
}

// ── Service meta ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub service: &'static str,
    pub version: &'static str,
}
