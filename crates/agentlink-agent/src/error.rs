//! Agent error types.
//!
//! Conversation operations surface errors through [`AgentError`]. Protocol
//! violations, transport faults, and credential failures stay distinct so
//! callers (the CLI, the REST surface) can react to each differently.

use std::fmt;

use agentlink_auth::AuthError;

use crate::session::SessionState;

/// Which session operation an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticate,
    Start,
    Send,
    End,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Authenticate => "authenticate",
            Stage::Start => "start",
            Stage::Send => "send",
            Stage::End => "end",
        })
    }
}

/// Violations of the conversation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The remote side started a conversation without telling us its id.
    #[error("the agent did not return a conversation id")]
    NoConversationId,

    /// A previous turn was abandoned before its activities were consumed.
    #[error("a turn is already in progress on conversation {conversation_id}")]
    ConcurrentTurnNotAllowed { conversation_id: String },

    /// The session has ended.
    #[error("conversation {conversation_id} is closed")]
    SessionClosed { conversation_id: String },

    /// A turn was attempted before the conversation started.
    #[error("conversation not started (session is {state})")]
    NotStarted { state: SessionState },

    /// The conversation was started before a credential was acquired.
    #[error("session is not authenticated")]
    NotAuthenticated,

    /// The conversation id is already assigned.
    #[error("conversation {conversation_id} already started")]
    AlreadyStarted { conversation_id: String },
}

/// Faults raised by an [`AgentTransport`](crate::transport::AgentTransport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body not read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent answered with a non-success status.
    #[error("agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// An event payload was not a valid activity.
    #[error("invalid activity payload: {reason}")]
    Decode { reason: String },

    /// The event stream broke off.
    #[error("activity stream error: {reason}")]
    Stream { reason: String },

    /// The endpoint could not be derived from the connection settings.
    #[error("invalid endpoint: {reason}")]
    Endpoint { reason: String },
}

/// Problems loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for the expected layout.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// One or more settings are missing or invalid.
    #[error("invalid configuration:\n  - {}", .problems.join("\n  - "))]
    Invalid { problems: Vec<String> },
}

/// Unified error type for conversation sessions.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Credential acquisition failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The session lifecycle was violated.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport failed; the fault is passed through unchanged.
    #[error("{stage} failed{}: {source}", conversation_suffix(.conversation_id.as_deref()))]
    Transport {
        stage: Stage,
        conversation_id: Option<String>,
        #[source]
        source: TransportError,
    },

    /// Writing the conversation log failed.
    #[error("conversation log error: {0}")]
    Log(#[from] std::io::Error),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn conversation_suffix(conversation_id: Option<&str>) -> String {
    conversation_id
        .map(|id| format!(" for conversation {id}"))
        .unwrap_or_default()
}

impl AgentError {
    pub(crate) fn transport(stage: Stage, conversation_id: Option<&str>, source: TransportError) -> Self {
        AgentError::Transport {
            stage,
            conversation_id: conversation_id.map(String::from),
            source,
        }
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_carries_context() {
        let err = AgentError::transport(
            Stage::Send,
            Some("conv-1"),
            TransportError::Status {
                status: 503,
                body: "busy".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "send failed for conversation conv-1: agent returned HTTP 503: busy"
        );
    }

    #[test]
    fn transport_error_without_conversation() {
        let err = AgentError::transport(
            Stage::Start,
            None,
            TransportError::Stream {
                reason: "eof".to_string(),
            },
        );
        assert_eq!(err.to_string(), "start failed: activity stream error: eof");
    }

    #[test]
    fn invalid_config_lists_every_problem() {
        let err = ConfigError::Invalid {
            problems: vec!["missing tenant_id".to_string(), "missing schema_name".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("- missing tenant_id"));
        assert!(text.contains("- missing schema_name"));
    }

    #[test]
    fn auth_errors_pass_through_verbatim() {
        let err: AgentError = AuthError::MissingSecret {
            variable: "AZURE_CLIENT_SECRET".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "missing secret: environment variable AZURE_CLIENT_SECRET is not set"
        );
    }
}
