//! Claude Relay - HTTP Server Entry Point
//!
//! Starts the HTTP gateway in front of the Claude Code CLI.

use claude_relay::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: agent={} timeout={}ms",
        config.agent.program,
        config.session_timeout.as_millis()
    );

    // Start HTTP server
    api::serve(config).await?;

    Ok(())
}
