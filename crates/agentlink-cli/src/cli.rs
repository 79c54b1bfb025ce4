//! CLI argument definitions for agentlink.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// agentlink -- talk to a Copilot Studio agent from the terminal.
#[derive(Parser)]
#[command(
    name = "agentlink",
    version,
    about = "agentlink -- Copilot Studio agent client",
    long_about = "Chat with a Copilot Studio agent, send one-off messages, or expose the \
                  agent over a small REST API. Settings come from agentlink.toml and \
                  COPILOT_STUDIO_* environment variables."
)]
pub struct Cli {
    /// Configuration file (default: agentlink.toml in the working directory
    /// or up to two parents).
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive conversation.
    Chat,

    /// Send messages in one conversation and print each answer.
    Send {
        /// Message to send; repeat to send several in order.
        #[arg(long, short, required = true)]
        message: Vec<String>,
    },

    /// Show the effective configuration with identifiers masked.
    Config,

    /// Start the REST API server.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on.
        #[arg(long, short, default_value_t = 8000)]
        port: u16,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn send_collects_messages_in_order() {
        let cli = Cli::try_parse_from(["agentlink", "send", "-m", "first", "-m", "second", "-v"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Send { message } => assert_eq!(message, ["first", "second"]),
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn send_requires_a_message() {
        assert!(Cli::try_parse_from(["agentlink", "send"]).is_err());
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["agentlink", "--config-file", "x.toml", "serve"]).unwrap();
        assert_eq!(cli.config_file, Some(PathBuf::from("x.toml")));
        match cli.command {
            Commands::Serve { bind, port } => {
                assert_eq!(bind, "127.0.0.1");
                assert_eq!(port, 8000);
            }
            _ => panic!("expected serve"),
        }
    }
}
