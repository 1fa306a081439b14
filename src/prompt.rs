//! One-shot prompts over a throwaway session.
//!
//! `prompt` runs a single exchange end to end: spawn the CLI, drain its
//! events, summarize the final `result` event. The prompt HTTP endpoints
//! and the retry loop both build on it.

use futures::StreamExt;
use serde::Serialize;

use crate::events::Usage;
use crate::process::AgentCli;
use crate::retry::RetryState;
use crate::session::{Session, SessionError, SessionOptions, StreamOptions};

/// Outcome of one prompt exchange, shaped for JSON responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Final answer text; empty when the exchange failed.
    pub result: String,
    /// Agent-assigned conversation id, usable with the resume endpoints.
    pub cli_session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<PromptUsage>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Present when at least one retry happened before this outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_state: Option<RetryState>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl PromptUsage {
    fn from_usage(usage: &Usage) -> Self {
        Self {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
        }
    }
}

/// Run one exchange on a throwaway session and wait for its outcome.
///
/// Failures surface two ways, mirroring the CLI itself: transport problems
/// (spawn failure, exit without a `result` event) are `Err`, while failures
/// the agent reported inside its `result` event come back as `Ok` with
/// `is_error` set and the error strings attached.
pub async fn prompt(
    agent: &AgentCli,
    message: &str,
    options: &SessionOptions,
) -> Result<PromptResult, SessionError> {
    let mut session = Session::new(agent.clone(), options.clone());
    session.send(message)?;
    let mut stream = session.stream(StreamOptions::default())?;

    let mut final_result = None;
    let mut init_session_id = None;
    let mut failure = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                if let Some(id) = event.init_session_id() {
                    init_session_id = Some(id.to_string());
                }
                if let Some(result) = event.as_result() {
                    final_result = Some(result.clone());
                }
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    drop(stream);
    session.close().await;

    if let Some(err) = failure {
        return Err(err);
    }
    // The stream yields IncompleteExchange itself when the result is
    // missing, so this is only a backstop.
    let result = final_result.ok_or(SessionError::IncompleteExchange {
        stderr: String::new(),
    })?;

    let cli_session_id = init_session_id.unwrap_or_else(|| result.session_id.clone());
    let usage = result.usage.as_ref().map(PromptUsage::from_usage);

    if result.is_success() {
        Ok(PromptResult {
            result: result.result.clone().unwrap_or_default(),
            cli_session_id,
            total_cost_usd: result.total_cost_usd,
            usage,
            is_error: false,
            errors: Vec::new(),
            retry_state: None,
        })
    } else {
        Ok(PromptResult {
            result: String::new(),
            cli_session_id,
            total_cost_usd: result.total_cost_usd,
            usage,
            is_error: true,
            errors: result.error_strings(),
            retry_state: None,
        })
    }
}
