//! Agent CLI process supervision.
//!
//! Each exchange spawns one CLI process with `--output-format stream-json`
//! and surfaces its stdout as a channel of parsed [`AgentEvent`]s. The child
//! itself lives in a shared slot so the reader task can reap it on EOF and
//! a [`ProcessHandle`] can kill it from anywhere.

use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::events::AgentEvent;
use crate::session::SessionOptions;

/// Tail of stderr kept per exchange, capped so a chatty CLI cannot grow it
/// without bound. Used to enrich incomplete-exchange errors.
const STDERR_TAIL_MAX: usize = 4096;

// ── Launch configuration ──────────────────────────────────────────

/// Which agent binary to launch, plus operator-supplied args appended to
/// every invocation (e.g. a permission-mode flag).
#[derive(Debug, Clone)]
pub struct AgentCli {
    pub program: String,
    pub extra_args: Vec<String>,
}

impl AgentCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }
}

/// Build the CLI invocation for one exchange.
pub fn build_command(
    agent: &AgentCli,
    prompt: &str,
    options: &SessionOptions,
    resume_session_id: Option<&str>,
) -> Command {
    let mut cmd = Command::new(&agent.program);
    cmd.arg("-p")
        .arg(prompt)
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose");

    if let Some(model) = &options.model {
        cmd.arg("--model").arg(model);
    }
    if let Some(system_prompt) = &options.system_prompt {
        cmd.arg("--system-prompt").arg(system_prompt);
    }
    if let Some(append) = &options.append_system_prompt {
        cmd.arg("--append-system-prompt").arg(append);
    }
    if let Some(tools) = &options.allowed_tools {
        if !tools.is_empty() {
            cmd.arg("--allowedTools").arg(tools.join(","));
        }
    }
    if let Some(servers) = &options.mcp_servers {
        // The CLI expects the full config document, not the bare server map.
        let config = serde_json::json!({ "mcpServers": servers });
        cmd.arg("--mcp-config").arg(config.to_string());
    }
    if let Some(agents) = &options.agents {
        cmd.arg("--agents").arg(agents.to_string());
    }
    if let Some(session_id) = resume_session_id {
        cmd.arg("--resume").arg(session_id);
    }
    cmd.args(&agent.extra_args);

    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

// ── Process handle ────────────────────────────────────────────────

/// Handle to a running agent CLI process. Call `kill()` to terminate the
/// process when closing a session or abandoning a stream.
#[derive(Clone)]
pub struct ProcessHandle {
    child: Arc<Mutex<Option<Child>>>,
}

impl ProcessHandle {
    /// Kill the underlying CLI process. No-op if the reader task has
    /// already reaped it.
    pub async fn kill(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill agent CLI process: {}", e);
            } else {
                info!("Agent CLI process killed");
            }
        }
    }
}

/// A spawned exchange: the process handle, the parsed event channel, and
/// the stderr tail collected so far.
pub struct AgentProcess {
    pub handle: ProcessHandle,
    pub events: mpsc::UnboundedReceiver<Result<AgentEvent, std::io::Error>>,
    pub stderr: StderrTail,
}

/// Spawn one CLI process for an exchange and wire up its reader tasks.
pub fn spawn(
    agent: &AgentCli,
    prompt: &str,
    options: &SessionOptions,
    resume_session_id: Option<&str>,
) -> std::io::Result<AgentProcess> {
    let mut cmd = build_command(agent, prompt, options, resume_session_id);

    info!(
        program = %agent.program,
        model = options.model.as_deref().unwrap_or("default"),
        resume = resume_session_id.unwrap_or("-"),
        "Spawning agent CLI"
    );

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "agent stdout not captured")
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "agent stderr not captured")
    })?;

    let child = Arc::new(Mutex::new(Some(child)));
    let tail = StderrTail::default();

    // Drain stderr so the CLI never blocks on a full pipe.
    let stderr_tail = tail.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "claude_relay::agent_stderr", "{}", line);
            stderr_tail.push_line(&line);
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let reader_child = child.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<AgentEvent>(line) {
                        Ok(event) => {
                            if tx.send(Ok(event)).is_err() {
                                // Receiver dropped, stop reading.
                                break;
                            }
                        }
                        Err(e) => {
                            // The CLI interleaves diagnostics with NDJSON.
                            debug!("Skipping non-event CLI output ({}): {}", e, line);
                        }
                    }
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }

        // Reap the child unless a kill already took it.
        if let Some(mut child) = reader_child.lock().await.take() {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!("Agent CLI exited cleanly");
                }
                Ok(status) => {
                    warn!("Agent CLI exited with {}", status);
                }
                Err(e) => {
                    warn!("Failed to await agent CLI exit: {}", e);
                }
            }
        }
    });

    Ok(AgentProcess {
        handle: ProcessHandle { child },
        events: rx,
        stderr: tail,
    })
}

// ── stderr tail ───────────────────────────────────────────────────

/// Shared, size-capped buffer of the most recent stderr output.
#[derive(Clone, Default)]
pub struct StderrTail {
    buf: Arc<std::sync::Mutex<String>>,
}

impl StderrTail {
    fn push_line(&self, line: &str) {
        let mut buf = self.buf.lock().expect("stderr tail lock poisoned");
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(line);
        if buf.len() > STDERR_TAIL_MAX {
            let cut = buf.len() - STDERR_TAIL_MAX;
            // Keep whole lines where possible.
            let cut = buf[cut..]
                .find('\n')
                .map(|i| cut + i + 1)
                .unwrap_or(cut);
            buf.drain(..cut);
        }
    }

    pub fn snapshot(&self) -> String {
        self.buf.lock().expect("stderr tail lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn build_command_always_requests_stream_json() {
        let agent = AgentCli::new("claude");
        let cmd = build_command(&agent, "hello", &SessionOptions::default(), None);
        let args = args_of(&cmd);
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "hello");
        assert!(args.contains(&"--output-format".to_string()));
        assert!(args.contains(&"stream-json".to_string()));
        assert!(args.contains(&"--verbose".to_string()));
        assert!(!args.contains(&"--resume".to_string()));
    }

    #[test]
    fn build_command_maps_session_options_to_flags() {
        let agent = AgentCli {
            program: "claude".to_string(),
            extra_args: vec!["--dangerously-skip-permissions".to_string()],
        };
        let options = SessionOptions {
            model: Some("claude-sonnet-4-5".to_string()),
            system_prompt: Some("be terse".to_string()),
            append_system_prompt: Some("and polite".to_string()),
            cwd: Some("/tmp".into()),
            allowed_tools: Some(vec!["Bash".to_string(), "Read".to_string()]),
            mcp_servers: Some(serde_json::json!({"files": {"command": "mcp-files"}})),
            agents: Some(serde_json::json!({"reviewer": {"description": "reviews"}})),
        };
        let cmd = build_command(&agent, "do it", &options, Some("sess-9"));
        let args = args_of(&cmd);

        let value_after = |flag: &str| {
            let idx = args.iter().position(|a| a == flag).unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(value_after("--model"), "claude-sonnet-4-5");
        assert_eq!(value_after("--system-prompt"), "be terse");
        assert_eq!(value_after("--append-system-prompt"), "and polite");
        assert_eq!(value_after("--allowedTools"), "Bash,Read");
        assert_eq!(value_after("--resume"), "sess-9");
        assert!(value_after("--mcp-config").contains("mcpServers"));
        assert_eq!(*args.last().unwrap(), "--dangerously-skip-permissions");
        assert_eq!(
            cmd.as_std().get_current_dir().unwrap().to_string_lossy(),
            "/tmp"
        );
    }

    #[test]
    fn build_command_skips_empty_allowed_tools() {
        let agent = AgentCli::new("claude");
        let options = SessionOptions {
            allowed_tools: Some(vec![]),
            ..Default::default()
        };
        let cmd = build_command(&agent, "hi", &options, None);
        assert!(!args_of(&cmd).contains(&"--allowedTools".to_string()));
    }

    #[test]
    fn stderr_tail_keeps_most_recent_output() {
        let tail = StderrTail::default();
        for i in 0..400 {
            tail.push_line(&format!("line number {} with some padding", i));
        }
        let snapshot = tail.snapshot();
        assert!(snapshot.len() <= STDERR_TAIL_MAX);
        assert!(snapshot.contains("line number 399"));
        assert!(!snapshot.contains("line number 0 "));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use crate::test_support::fake_agent;

        #[tokio::test]
        async fn reader_parses_events_and_skips_noise() {
            let (_dir, agent) = fake_agent(
                r#"#!/bin/sh
echo '{"type":"system","subtype":"init","session_id":"sess-1"}'
echo 'not json at all'
echo '{"type":"result","subtype":"success","session_id":"sess-1","result":"ok"}'
"#,
            );
            let mut proc = spawn(&agent, "hi", &SessionOptions::default(), None).unwrap();

            let mut events = Vec::new();
            while let Some(item) = proc.events.recv().await {
                events.push(item.unwrap());
            }
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].init_session_id(), Some("sess-1"));
            assert!(events[1].as_result().is_some());
        }

        #[tokio::test]
        async fn kill_ends_the_event_channel() {
            let (_dir, agent) = fake_agent(
                r#"#!/bin/sh
echo '{"type":"system","subtype":"init","session_id":"sess-1"}'
sleep 30
echo '{"type":"result","subtype":"success","session_id":"sess-1"}'
"#,
            );
            let mut proc = spawn(&agent, "hi", &SessionOptions::default(), None).unwrap();

            let first = proc.events.recv().await.unwrap().unwrap();
            assert_eq!(first.init_session_id(), Some("sess-1"));

            proc.handle.kill().await;
            // Idempotent: the slot is already empty.
            proc.handle.kill().await;

            assert!(proc.events.recv().await.is_none());
        }

        #[tokio::test]
        async fn stderr_is_collected_into_tail() {
            let (_dir, agent) = fake_agent(
                r#"#!/bin/sh
echo 'something went sideways' >&2
echo '{"type":"result","subtype":"success","session_id":"sess-1"}'
"#,
            );
            let mut proc = spawn(&agent, "hi", &SessionOptions::default(), None).unwrap();
            while proc.events.recv().await.is_some() {}
            // The stderr task runs concurrently; give it a beat to drain.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            assert!(proc.stderr.snapshot().contains("something went sideways"));
        }
    }
}
