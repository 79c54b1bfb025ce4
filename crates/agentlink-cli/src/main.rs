//! CLI entry point for agentlink.
//!
//! This binary provides the `agentlink` command with subcommands for
//! chatting with the agent, sending one-off messages, inspecting the
//! configuration, and serving the REST API.

mod chat;
mod cli;
mod helpers;

use std::sync::Arc;

use agentlink_auth::ProcessEnv;
use agentlink_web::{AppState, WebConfig, WebServer};
use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::helpers::{build_manager, build_transport, init_tracing, load_config, load_valid_config, log_level};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(log_level(cli.verbose));

    let config_file = cli.config_file.as_deref();
    match cli.command {
        Commands::Chat => chat::cmd_chat(config_file).await,
        Commands::Send { message } => chat::cmd_send(config_file, &message).await,
        Commands::Config => cmd_config(config_file),
        Commands::Serve { bind, port } => cmd_serve(config_file, bind, port).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: config
// ---------------------------------------------------------------------------

fn cmd_config(config_file: Option<&std::path::Path>) -> Result<()> {
    let config = load_config(config_file)?;
    println!("{}", config.display());
    config.validate(&ProcessEnv)?;
    println!("Configuration is valid.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config_file: Option<&std::path::Path>, bind: String, port: u16) -> Result<()> {
    let config = load_valid_config(config_file)?;
    let manager = build_manager(&config)?;
    let transport = build_transport(&config)?;

    let state = AppState::new(Arc::new(config), Arc::new(manager), transport);
    let server = WebServer::new(WebConfig { bind_addr: bind, port }, state);
    println!("  agentlink API listening on http://{}", server.addr());

    server.start().await.context("web server failed")
}
