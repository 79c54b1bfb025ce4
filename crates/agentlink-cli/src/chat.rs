//! Subcommands that talk to the agent: `agentlink chat` and `agentlink send`.

use std::io::{self, Write as _};
use std::path::Path;

use agentlink_agent::{AgentError, ProtocolError};
use anyhow::{Context, Result};
use tracing::info;

use crate::helpers::{build_manager, load_valid_config, open_session};

/// Exit status used when the user interrupts a chat.
const INTERRUPTED_EXIT_CODE: i32 = 130;

const HELP_TEXT: &str = "\
  Commands:
    help              Show this help
    exit, quit, bye   End the conversation
  Anything else is sent to the agent.";

/// What to do with one line of chat input.
#[derive(Debug, PartialEq, Eq)]
enum LineAction<'a> {
    Skip,
    Help,
    Exit,
    Send(&'a str),
}

fn parse_line(line: &str) -> LineAction<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineAction::Skip;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "help" => LineAction::Help,
        "exit" | "quit" | "bye" => LineAction::Exit,
        _ => LineAction::Send(trimmed),
    }
}

/// Run the interactive chat loop.
pub async fn cmd_chat(config_file: Option<&Path>) -> Result<()> {
    let config = load_valid_config(config_file)?;
    let manager = build_manager(&config)?;

    println!();
    println!("  agentlink v{}", env!("CARGO_PKG_VERSION"));
    println!("  Connecting to {}...", config.agent.name);

    let (mut session, greeting) = open_session(&config, &manager).await?;
    let conversation_id = session.conversation_id().unwrap_or_default().to_string();

    println!("  Conversation: {conversation_id}");
    println!("  Type 'help' for commands, 'exit' to quit.");
    println!();
    if !greeting.is_empty() {
        println!("Agent: {}", greeting.render());
        println!();
    }

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Interrupted. Goodbye!");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let stdin = io::stdin();
    let mut line_buf = String::new();

    loop {
        print!("You: ");
        io::stdout().flush().ok();

        line_buf.clear();
        match stdin.read_line(&mut line_buf) {
            Ok(0) => {
                println!();
                info!("EOF received, exiting");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("  Error reading input: {e}");
                continue;
            }
        }

        let message = match parse_line(&line_buf) {
            LineAction::Skip => continue,
            LineAction::Help => {
                println!("{HELP_TEXT}");
                continue;
            }
            LineAction::Exit => {
                info!("user requested exit");
                break;
            }
            LineAction::Send(message) => message,
        };

        match session.send(message).await {
            Ok(response) => {
                println!();
                println!("Agent: {}", response.render());
                println!();
            }
            Err(AgentError::Protocol(e @ ProtocolError::SessionClosed { .. })) => {
                eprintln!("  {e}");
                break;
            }
            Err(e) => eprintln!("  Error: {e}"),
        }
    }

    session.end().await.context("failed to close conversation")?;
    println!("  Goodbye!");
    Ok(())
}

/// Send each message in turn within one conversation.
pub async fn cmd_send(config_file: Option<&Path>, messages: &[String]) -> Result<()> {
    let config = load_valid_config(config_file)?;
    let manager = build_manager(&config)?;
    let (mut session, _greeting) = open_session(&config, &manager).await?;

    for message in messages {
        let response = session
            .send(message)
            .await
            .with_context(|| format!("failed to send '{message}'"))?;
        println!("You: {message}");
        println!("Agent: {}", response.render());
        println!();
    }

    session.end().await.context("failed to close conversation")?;
    Ok(())
}
