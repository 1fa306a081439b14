//! Configuration management for claude-relay.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `API_KEYS` - Comma-separated list of accepted API keys. Required outside
//!   dev mode; when empty in dev mode, auth is disabled.
//! - `CORS_ORIGINS` - Optional. Comma-separated allowed origins. Empty means
//!   any origin is accepted.
//! - `SESSION_TIMEOUT_MS` - Optional. Idle session eviction threshold.
//!   Defaults to `1800000` (30 minutes).
//! - `AGENT_CLI` - Optional. The agent binary to spawn. Defaults to `claude`.
//! - `AGENT_CLI_ARGS` - Optional. Whitespace-separated extra flags appended to
//!   every CLI invocation (e.g. permission-mode flags).
//! - `DEV_MODE` - Optional. Defaults to true in debug builds.
//! - `RETRY_MAX_RETRIES` / `RETRY_INITIAL_DELAY_MS` / `RETRY_BACKOFF_MULTIPLIER`
//!   / `RETRY_MAX_DELAY_MS` / `RETRY_RETRYABLE_ERRORS` - Optional. Defaults for
//!   the one-shot prompt retry loop.

use std::time::Duration;
use thiserror::Error;

use crate::process::AgentCli;
use crate::retry::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Accepted API keys (X-API-Key header or bearer token)
    pub api_keys: Vec<String>,

    /// Allowed CORS origins; empty means any
    pub cors_origins: Vec<String>,

    /// Idle threshold after which the sweeper evicts a session
    pub session_timeout: Duration,

    /// Agent CLI to spawn for each exchange
    pub agent: AgentCli,

    /// Default retry behavior for one-shot prompts
    pub retry: RetryConfig,

    /// Development mode (auth optional; more permissive defaults)
    pub dev_mode: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `API_KEYS` is empty outside
    /// dev mode, or `ConfigError::InvalidValue` for unparseable numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let api_keys = std::env::var("API_KEYS")
            .map(|v| split_csv(&v))
            .unwrap_or_default();

        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| split_csv(&v))
            .unwrap_or_default();

        let session_timeout_ms: u64 = std::env::var("SESSION_TIMEOUT_MS")
            .unwrap_or_else(|_| "1800000".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("SESSION_TIMEOUT_MS".to_string(), format!("{}", e))
            })?;

        let mut agent = AgentCli::new(
            std::env::var("AGENT_CLI").unwrap_or_else(|_| "claude".to_string()),
        );
        agent.extra_args = std::env::var("AGENT_CLI_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let dev_mode = std::env::var("DEV_MODE")
            .ok()
            .map(|v| parse_bool(&v).map_err(|e| ConfigError::InvalidValue("DEV_MODE".to_string(), e)))
            .transpose()?
            // In debug builds, default to dev_mode=true; in release, default to false.
            .unwrap_or(cfg!(debug_assertions));

        // In non-dev mode, require at least one API key.
        if !dev_mode && api_keys.is_empty() {
            return Err(ConfigError::MissingEnvVar("API_KEYS".to_string()));
        }

        let retry = retry_from_env()?;

        Ok(Self {
            host,
            port,
            api_keys,
            cors_origins,
            session_timeout: Duration::from_millis(session_timeout_ms),
            agent,
            retry,
            dev_mode,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(agent_program: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            api_keys: Vec::new(),
            cors_origins: Vec::new(),
            session_timeout: Duration::from_millis(1_800_000),
            agent: AgentCli::new(agent_program),
            retry: RetryConfig::default(),
            dev_mode: true,
        }
    }
}

fn retry_from_env() -> Result<RetryConfig, ConfigError> {
    let defaults = RetryConfig::default();

    let max_retries = std::env::var("RETRY_MAX_RETRIES")
        .ok()
        .map(|v| {
            v.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("RETRY_MAX_RETRIES".to_string(), format!("{}", e))
            })
        })
        .transpose()?
        .unwrap_or(defaults.max_retries);

    let initial_delay_ms = std::env::var("RETRY_INITIAL_DELAY_MS")
        .ok()
        .map(|v| {
            v.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("RETRY_INITIAL_DELAY_MS".to_string(), format!("{}", e))
            })
        })
        .transpose()?
        .unwrap_or(defaults.initial_delay_ms);

    let backoff_multiplier = std::env::var("RETRY_BACKOFF_MULTIPLIER")
        .ok()
        .map(|v| {
            v.parse::<f64>().map_err(|e| {
                ConfigError::InvalidValue("RETRY_BACKOFF_MULTIPLIER".to_string(), format!("{}", e))
            })
        })
        .transpose()?
        .unwrap_or(defaults.backoff_multiplier);

    let max_delay_ms = std::env::var("RETRY_MAX_DELAY_MS")
        .ok()
        .map(|v| {
            v.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("RETRY_MAX_DELAY_MS".to_string(), format!("{}", e))
            })
        })
        .transpose()?
        .unwrap_or(defaults.max_delay_ms);

    let retryable_errors = std::env::var("RETRY_RETRYABLE_ERRORS")
        .map(|v| split_csv(&v))
        .unwrap_or(defaults.retryable_errors);

    Ok(RetryConfig {
        max_retries,
        initial_delay_ms,
        backoff_multiplier,
        max_delay_ms,
        retryable_errors,
    })
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
