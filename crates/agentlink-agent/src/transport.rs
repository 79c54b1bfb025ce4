//! The remote agent as a source of activities.
//!
//! Sessions never speak HTTP themselves; they drive an [`AgentTransport`].
//! The Copilot Studio implementation lives in [`crate::copilot`], tests use
//! scripted in-memory transports.

use agentlink_auth::Credential;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::activity::RawActivity;
use crate::error::TransportError;

/// The activities of one turn. Finite; ends when the agent signals the end
/// of the turn.
pub type ActivityStream = BoxStream<'static, Result<RawActivity, TransportError>>;

/// What the agent returned when a conversation was opened.
#[derive(Debug, Clone, Default)]
pub struct OpenedConversation {
    /// The id the agent assigned, if it reported one.
    pub conversation_id: Option<String>,
    /// Greeting and other activities emitted on start.
    pub activities: Vec<RawActivity>,
}

/// Opens conversations and exchanges turns with a remote agent.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Open a new conversation.
    async fn open_conversation(
        &self,
        credential: &Credential,
    ) -> Result<OpenedConversation, TransportError>;

    /// Send one message and return the activities answering it.
    async fn ask_question(
        &self,
        conversation_id: &str,
        credential: &Credential,
        message: &str,
    ) -> Result<ActivityStream, TransportError>;
}
