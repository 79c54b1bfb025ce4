//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, configuration loading, and session
//! construction.

use std::path::Path;
use std::sync::Arc;

use agentlink_agent::{
    AgentLinkConfig, AgentTransport, AssembledResponse, ConversationLog, ConversationSession,
    CopilotStudioTransport,
};
use agentlink_auth::{ProcessEnv, SecretSource, TokenAcquisitionManager};
use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so they never interleave with agent answers on stdout.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// `debug` when verbose, `info` otherwise.
pub fn log_level(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load `.env`, then the configuration file and environment overrides.
pub fn load_config(config_file: Option<&Path>) -> Result<AgentLinkConfig> {
    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }

    let config = AgentLinkConfig::load(config_file, &ProcessEnv).context("failed to load configuration")?;
    if let Some(source) = &config.source {
        info!(path = %source.display(), "configuration loaded");
    }
    Ok(config)
}

/// Load and validate, failing with every problem listed.
pub fn load_valid_config(config_file: Option<&Path>) -> Result<AgentLinkConfig> {
    let config = load_config(config_file)?;
    config.validate(&ProcessEnv)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Token acquisition manager for the configured auth mode.
pub fn build_manager(config: &AgentLinkConfig) -> Result<TokenAcquisitionManager> {
    let settings = config.auth_settings()?;
    let secrets: Arc<dyn SecretSource> = Arc::new(ProcessEnv);
    let manager = TokenAcquisitionManager::new(&settings, config.token_store(), secrets)
        .context("failed to set up authentication")?;
    info!(mode = %manager.mode(), "authentication configured");
    Ok(manager)
}

/// Copilot Studio transport for the configured agent.
pub fn build_transport(config: &AgentLinkConfig) -> Result<Arc<dyn AgentTransport>> {
    let transport = CopilotStudioTransport::new(config.connection_settings()?)
        .context("failed to set up the agent connection")?;
    Ok(Arc::new(transport))
}

/// Authenticate and start a conversation; returns the session and greeting.
pub async fn open_session(
    config: &AgentLinkConfig,
    manager: &TokenAcquisitionManager,
) -> Result<(ConversationSession, AssembledResponse)> {
    let mut session =
        ConversationSession::new(build_transport(config)?, ConversationLog::new(&config.logs_dir));
    session
        .authenticate(manager)
        .await
        .context("authentication failed")?;
    let greeting = session
        .start()
        .await
        .context("failed to start conversation")?;
    Ok((session, greeting))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_selects_debug() {
        assert_eq!(log_level(true), "debug");
        assert_eq!(log_level(false), "info");
    }
}
