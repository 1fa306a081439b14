//! Conversational session over the agent CLI.
//!
//! A [`Session`] owns at most one in-flight CLI process. `send` stores the
//! next message, `stream` spawns one process for that exchange and yields
//! its events as they arrive. The agent-assigned conversation id captured
//! from the `init` event is replayed with `--resume` on the next exchange,
//! which is what gives a session multi-turn memory.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::events::AgentEvent;
use crate::process::{self, AgentCli, ProcessHandle};

// ── Options and errors ────────────────────────────────────────────

/// Per-session configuration forwarded to the CLI on every exchange.
/// Field names match the JSON bodies the HTTP layer accepts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub cwd: Option<PathBuf>,
    pub mcp_servers: Option<Value>,
    pub agents: Option<Value>,
    pub allowed_tools: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// A prior exchange's stream has not been drained or closed yet.
    #[error("cannot send while a stream is active; consume the stream first")]
    StreamActive,

    /// `stream` was called without a pending message.
    #[error("no message to send; call send() first")]
    NoPendingMessage,

    /// The CLI exited without ever emitting a `result` event.
    #[error("agent exited without a result event{}", fmt_stderr(.stderr))]
    IncompleteExchange { stderr: String },

    #[error("failed to spawn agent CLI `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading agent output: {0}")]
    Read(#[source] std::io::Error),
}

fn fmt_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" (stderr: {})", stderr)
    }
}

/// Options for one call to [`Session::stream`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    /// Suppress everything except `result` events and `assistant` events
    /// with visible content (text or tool_use blocks).
    pub filter: bool,
}

// ── Session ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ConvoState {
    agent_session_id: Option<String>,
    has_started: bool,
}

/// One conversation against the agent CLI, serialized to one exchange at
/// a time.
pub struct Session {
    agent: AgentCli,
    options: SessionOptions,
    pending: Option<String>,
    /// Conversation identity, shared with in-flight streams so the `init`
    /// side effect lands even while an exchange is still draining.
    state: Arc<std::sync::Mutex<ConvoState>>,
    /// The currently running process, if any. Shared with the stream's
    /// release guard, which empties it on every exit path.
    active: Arc<std::sync::Mutex<Option<ProcessHandle>>>,
}

impl Session {
    pub fn new(agent: AgentCli, options: SessionOptions) -> Self {
        Self {
            agent,
            options,
            pending: None,
            state: Arc::new(std::sync::Mutex::new(ConvoState::default())),
            active: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Construct a session already bound to a known agent-assigned
    /// conversation id, so its first exchange continues that conversation.
    pub fn resume(
        agent: AgentCli,
        agent_session_id: impl Into<String>,
        options: SessionOptions,
    ) -> Self {
        let session = Self::new(agent, options);
        {
            let mut state = session.state.lock().expect("session state lock poisoned");
            state.agent_session_id = Some(agent_session_id.into());
            state.has_started = true;
        }
        session
    }

    /// The agent-assigned conversation id, once an `init` event has been
    /// observed (or the session was constructed via [`Session::resume`]).
    pub fn agent_session_id(&self) -> Option<String> {
        self.state
            .lock()
            .expect("session state lock poisoned")
            .agent_session_id
            .clone()
    }

    pub fn has_started(&self) -> bool {
        self.state
            .lock()
            .expect("session state lock poisoned")
            .has_started
    }

    /// Whether an exchange is currently in flight.
    pub fn is_streaming(&self) -> bool {
        self.active
            .lock()
            .expect("session process slot poisoned")
            .is_some()
    }

    /// Store the next message. Does not start the process; call
    /// [`Session::stream`] to run the exchange.
    pub fn send(&mut self, message: impl Into<String>) -> Result<(), SessionError> {
        if self.is_streaming() {
            return Err(SessionError::StreamActive);
        }
        self.pending = Some(message.into());
        Ok(())
    }

    /// Spawn one CLI process for the pending message and return its event
    /// stream.
    ///
    /// The stream is finite: it ends once the process has been reaped after
    /// its `result` event, and yields `IncompleteExchange` if the process
    /// dies without one. Dropping the stream early kills the process and
    /// frees the session for the next `send` — useful when an SSE client
    /// disconnects mid-exchange.
    pub fn stream(&mut self, options: StreamOptions) -> Result<EventStream, SessionError> {
        let message = self.pending.take().ok_or(SessionError::NoPendingMessage)?;

        let resume_id = {
            let state = self.state.lock().expect("session state lock poisoned");
            if state.has_started {
                state.agent_session_id.clone()
            } else {
                None
            }
        };

        let spawned = process::spawn(&self.agent, &message, &self.options, resume_id.as_deref())
            .map_err(|e| SessionError::Spawn {
                program: self.agent.program.clone(),
                source: e,
            })?;
        let process::AgentProcess {
            handle,
            mut events,
            stderr,
        } = spawned;

        *self.active.lock().expect("session process slot poisoned") = Some(handle);

        let state = self.state.clone();
        let release = ReleaseGuard {
            slot: self.active.clone(),
        };
        let stream = async_stream::stream! {
            let _release = release;
            let mut saw_result = false;

            while let Some(item) = events.recv().await {
                match item {
                    Ok(event) => {
                        if let Some(id) = event.init_session_id() {
                            let mut state =
                                state.lock().expect("session state lock poisoned");
                            state.agent_session_id = Some(id.to_string());
                            state.has_started = true;
                        }
                        if event.as_result().is_some() {
                            saw_result = true;
                        }
                        if !options.filter || event.passes_filter() {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(SessionError::Read(e));
                        return;
                    }
                }
            }

            // The channel closes only after the reader reaped the child, so
            // reaching this point means the process has fully exited.
            if !saw_result {
                yield Err(SessionError::IncompleteExchange {
                    stderr: stderr.snapshot(),
                });
            }
        };

        Ok(EventStream {
            inner: Box::pin(stream),
        })
    }

    /// Terminate any in-flight process. Idempotent; a session stays usable
    /// for further exchanges after `close`.
    pub async fn close(&mut self) {
        let handle = self
            .active
            .lock()
            .expect("session process slot poisoned")
            .take();
        if let Some(handle) = handle {
            handle.kill().await;
        }
    }
}

// ── Event stream ──────────────────────────────────────────────────

/// Ordered events from one exchange.
pub struct EventStream {
    inner: BoxStream<'static, Result<AgentEvent, SessionError>>,
}

impl Stream for EventStream {
    type Item = Result<AgentEvent, SessionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

/// Empties the session's process slot when the stream finishes or is
/// dropped, killing the process if it is still running. The guard is built
/// with the stream rather than inside it, so even a stream dropped before
/// its first poll releases the slot. Taking the handle synchronously means
/// a follow-up `send` observes a free slot immediately; the kill itself
/// needs a tokio runtime to run on.
struct ReleaseGuard {
    slot: Arc<std::sync::Mutex<Option<ProcessHandle>>>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let handle = self
            .slot
            .lock()
            .expect("session process slot poisoned")
            .take();
        if let Some(handle) = handle {
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(async move { handle.kill().await });
                }
                Err(_) => {
                    warn!("dropped outside a runtime; agent process left to exit on its own");
                }
            }
        }
    }
}
