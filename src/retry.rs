//! Error classification and retry policy for prompt exchanges.
//!
//! The agent CLI reports transient failures (rate limits, provider
//! capacity) as plain strings, either inside `result` events or as
//! process-level errors. This module classifies those strings, derives a
//! backoff delay, and re-runs whole exchanges until one succeeds or the
//! retry budget is spent.

use std::time::Duration;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::process::AgentCli;
use crate::prompt::{prompt, PromptResult};
use crate::session::{SessionError, SessionOptions};

// ── Classification ────────────────────────────────────────────────

/// Category assigned to an error string by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Overloaded,
    UsageLimit,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Overloaded => write!(f, "overloaded"),
            Self::UsageLimit => write!(f, "usage_limit"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classifier verdict for one error string.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub is_retryable: bool,
    pub error_type: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub original_error: String,
}

/// Classify an error string against the ordered decision list.
///
/// Rate-limit and overload checks run before the usage-limit check, so a
/// message like "429: credit exhausted" counts as a rate limit. Usage and
/// billing limits are never retryable; they need user action. Anything
/// else is retryable only if it matches one of the caller's extra
/// substring patterns.
pub fn classify_error(message: &str, extra_patterns: &[String]) -> ClassifiedError {
    let lower = message.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("rate limit") || has("rate_limit") || has("429") || has("too many requests") {
        return ClassifiedError {
            is_retryable: true,
            error_type: ErrorKind::RateLimit,
            retry_after_ms: extract_retry_after(message),
            original_error: message.to_string(),
        };
    }

    if has("overloaded") || has("capacity") || has("503") || has("service unavailable") {
        return ClassifiedError {
            is_retryable: true,
            error_type: ErrorKind::Overloaded,
            retry_after_ms: extract_retry_after(message),
            original_error: message.to_string(),
        };
    }

    if has("quota exceeded") || has("usage limit") || has("credit") || has("billing") {
        return ClassifiedError {
            is_retryable: false,
            error_type: ErrorKind::UsageLimit,
            retry_after_ms: None,
            original_error: message.to_string(),
        };
    }

    let is_retryable = extra_patterns
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()));
    ClassifiedError {
        is_retryable,
        error_type: ErrorKind::Unknown,
        retry_after_ms: None,
        original_error: message.to_string(),
    }
}

/// Best-effort scan for a server-advised wait, e.g. "retry after 30
/// seconds" or "retry-after: 30". Returns milliseconds. Patterns are tried
/// in a fixed order and the first match wins.
pub fn extract_retry_after(message: &str) -> Option<u64> {
    static PATTERNS: std::sync::LazyLock<[Regex; 3]> = std::sync::LazyLock::new(|| {
        [
            Regex::new(r"(?i)retry[- ]?after[:\s]+(\d+)\s*(?:seconds?|s)?").unwrap(),
            Regex::new(r"(?i)wait[:\s]+(\d+)\s*(?:seconds?|s)?").unwrap(),
            Regex::new(r"(?i)(\d+)\s*(?:seconds?|s)\s*(?:before|until)").unwrap(),
        ]
    });

    for pattern in PATTERNS.iter() {
        if let Some(caps) = pattern.captures(message) {
            if let Ok(seconds) = caps[1].parse::<u64>() {
                return Some(seconds * 1000);
            }
        }
    }
    None
}

// ── Policy ────────────────────────────────────────────────────────

/// Retry policy for one-shot prompts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Extra substrings (beyond the built-in classes) that mark an error
    /// retryable.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            retryable_errors: vec![
                "connection reset".to_string(),
                "connection refused".to_string(),
                "socket hang up".to_string(),
                "timed out".to_string(),
            ],
        }
    }
}

impl RetryConfig {
    /// Apply request-level overrides on top of this policy.
    pub fn merged(&self, overrides: &RetryOverrides) -> RetryConfig {
        RetryConfig {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            initial_delay_ms: overrides.initial_delay_ms.unwrap_or(self.initial_delay_ms),
            backoff_multiplier: overrides
                .backoff_multiplier
                .unwrap_or(self.backoff_multiplier),
            max_delay_ms: overrides.max_delay_ms.unwrap_or(self.max_delay_ms),
            retryable_errors: overrides
                .retryable_errors
                .clone()
                .unwrap_or_else(|| self.retryable_errors.clone()),
        }
    }
}

/// Per-request overrides for the retry policy; unset fields fall back to
/// the server defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub retryable_errors: Option<Vec<String>>,
}

/// Delay in milliseconds before retry number `attempt` (1-based).
///
/// A server-advised retry-after wins, padded with up to a second of
/// jitter; otherwise exponential backoff with jitter proportional to the
/// initial delay. Both paths are capped at `max_delay_ms`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig, retry_after_ms: Option<u64>) -> u64 {
    let mut rng = rand::thread_rng();

    if let Some(retry_after) = retry_after_ms.filter(|&ms| ms > 0) {
        let jitter: f64 = rng.gen_range(0.0..=1000.0);
        return (retry_after as f64 + jitter).min(config.max_delay_ms as f64) as u64;
    }

    let exponential =
        config.initial_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let jitter: f64 = rng.gen_range(0.0..=config.initial_delay_ms as f64);
    (exponential + jitter).min(config.max_delay_ms as f64) as u64
}

// ── Retry loop ────────────────────────────────────────────────────

/// Progress of the retry loop, attached to responses that retried.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ClassifiedError>,
    pub total_delay_ms: u64,
}

/// Run [`prompt`] with automatic retry on transient failures.
///
/// Two failure surfaces are classified: error strings the agent reports
/// inside its `result` event, and transport errors from the exchange
/// itself. Every retry re-runs the whole exchange on a fresh process.
/// Once the budget is spent or the failure is non-retryable, result-level
/// failures come back as `Ok` with `is_error` set (plus the accumulated
/// [`RetryState`] when at least one retry happened) and transport errors
/// come back as `Err`.
pub async fn prompt_with_retry(
    agent: &AgentCli,
    message: &str,
    options: &SessionOptions,
    config: &RetryConfig,
) -> Result<PromptResult, SessionError> {
    let mut state = RetryState {
        attempt: 0,
        last_error: None,
        total_delay_ms: 0,
    };

    loop {
        match prompt(agent, message, options).await {
            Ok(mut result) => {
                if result.is_error && !result.errors.is_empty() {
                    let retryable = result
                        .errors
                        .iter()
                        .map(|err| classify_error(err, &config.retryable_errors))
                        .find(|classified| classified.is_retryable);

                    if let Some(classified) = retryable {
                        if state.attempt < config.max_retries {
                            back_off(&mut state, classified, config).await;
                            continue;
                        }
                    }
                }

                if state.attempt > 0 {
                    result.retry_state = Some(state);
                }
                return Ok(result);
            }
            Err(err) => {
                let classified = classify_error(&err.to_string(), &config.retryable_errors);
                if classified.is_retryable && state.attempt < config.max_retries {
                    back_off(&mut state, classified, config).await;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

async fn back_off(state: &mut RetryState, classified: ClassifiedError, config: &RetryConfig) {
    state.attempt += 1;
    let delay_ms = calculate_backoff(state.attempt, config, classified.retry_after_ms);
    state.total_delay_ms += delay_ms;
    tracing::warn!(
        error_type = %classified.error_type,
        attempt = state.attempt,
        max_retries = config.max_retries,
        delay_ms,
        "Retryable error from agent, backing off"
    );
    state.last_error = Some(classified);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/// Whether any error string indicates a usage or billing limit that needs
/// user action rather than a retry.
pub fn is_usage_limit_error(errors: &[String]) -> bool {
    errors
        .iter()
        .any(|err| classify_error(err, &[]).error_type == ErrorKind::UsageLimit)
}

/// Whether any error string is retryable under the given extra patterns.
pub fn has_retryable_error(errors: &[String], extra_patterns: &[String]) -> bool {
    errors
        .iter()
        .any(|err| classify_error(err, extra_patterns).is_retryable)
}
