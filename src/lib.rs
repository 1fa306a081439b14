//! # Claude Relay
//!
//! A self-hosted HTTP gateway in front of the Claude Code CLI.
//!
//! This library provides:
//! - An HTTP API for stateful sessions and one-shot prompts
//! - SSE streaming of the CLI's stream-json events
//! - Retry with backoff for transient agent failures
//!
//! ## Architecture
//!
//! Every exchange spawns one CLI process in `--output-format stream-json`
//! mode:
//! 1. Receive a message via the API
//! 2. Spawn the CLI, resuming the conversation when it has an id
//! 3. Parse NDJSON events off stdout and forward them (buffered or SSE)
//! 4. Capture the `result` event; evict sessions that idle out
//!
//! ## Example
//!
//! ```rust,ignore
//! use claude_relay::{api, config::Config};
//!
//! let config = Config::from_env()?;
//! api::serve(config).await?;
//! ```

pub mod api;
pub mod config;
pub mod events;
pub mod manager;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
