//! Typed events emitted by the agent CLI in stream-json mode.
//!
//! Each NDJSON line the CLI writes is one event, discriminated by `type`.
//! The shapes here are a faithful subset of the CLI protocol: unknown fields
//! are ignored on the way in, and `Option` fields are omitted on the way out
//! so re-serialized events stay close to what the CLI produced.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted by the agent CLI in stream-json mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "system")]
    System(SystemEvent),
    #[serde(rename = "assistant")]
    Assistant(AssistantEvent),
    #[serde(rename = "user")]
    User(UserEvent),
    #[serde(rename = "result")]
    Result(ResultEvent),
}

impl AgentEvent {
    /// The `type` discriminant, used as the SSE frame name.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentEvent::System(_) => "system",
            AgentEvent::Assistant(_) => "assistant",
            AgentEvent::User(_) => "user",
            AgentEvent::Result(_) => "result",
        }
    }

    /// Event uuid when the CLI provided one (used as the SSE frame id).
    pub fn uuid(&self) -> Option<&str> {
        match self {
            AgentEvent::System(e) => e.uuid.as_deref(),
            AgentEvent::Assistant(e) => e.uuid.as_deref(),
            AgentEvent::User(e) => e.uuid.as_deref(),
            AgentEvent::Result(e) => e.uuid.as_deref(),
        }
    }

    /// For `system`/`init` events, the agent-assigned conversation id.
    pub fn init_session_id(&self) -> Option<&str> {
        match self {
            AgentEvent::System(e) if e.subtype == "init" => Some(&e.session_id),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&ResultEvent> {
        match self {
            AgentEvent::Result(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the event survives `filter=true` streaming: `result` events
    /// always pass; `assistant` events pass when at least one content block
    /// is text or tool_use (thinking-only turns are dropped); everything
    /// else is suppressed.
    pub fn passes_filter(&self) -> bool {
        match self {
            AgentEvent::Result(_) => true,
            AgentEvent::Assistant(e) => e.message.content.iter().any(|block| {
                matches!(
                    block,
                    ContentBlock::Text { .. } | ContentBlock::ToolUse { .. }
                )
            }),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub subtype: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantEvent {
    pub message: AssistantMessage,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEvent {
    pub message: UserMessage,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        /// Content can be a string (text result) or an array (e.g., image results).
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
}

/// Tool result content — either a simple string or structured content
/// (array with images/text).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Structured(Vec<Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEvent {
    pub subtype: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Error strings for `result`/`error` events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ResultEvent {
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }

    /// Error strings to feed into the retry classifier.
    ///
    /// Recent CLI versions populate `errors`; older ones put the failure text
    /// in `result` with `is_error` set, so fall back to that.
    pub fn error_strings(&self) -> Vec<String> {
        if !self.errors.is_empty() {
            return self.errors.clone();
        }
        if self.is_error {
            if let Some(text) = self.result.as_deref().filter(|s| !s.is_empty()) {
                return vec![text.to_string()];
            }
        }
        Vec::new()
    }
}
