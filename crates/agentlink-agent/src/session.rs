//! Conversation sessions.
//!
//! A [`ConversationSession`] walks `Unauthenticated → Authenticated →
//! Started → Ended`. Turns run one at a time: each [`send`] drains the
//! turn's activity stream, classifying and assembling as it goes. If a
//! `send` future is dropped before the stream is drained, the next call
//! fails with [`ProtocolError::ConcurrentTurnNotAllowed`] and the session
//! ends.
//!
//! [`send`]: ConversationSession::send

use std::fmt;
use std::sync::Arc;

use agentlink_auth::{Credential, TokenAcquisitionManager};
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::activity::RawActivity;
use crate::assembler::{AssembledResponse, ResponseAssembler};
use crate::classifier::ActivityClassifier;
use crate::error::{AgentError, ProtocolError, Result, Stage, TransportError};
use crate::log::ConversationLog;
use crate::transport::AgentTransport;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Started,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated => "authenticated",
            SessionState::Started => "started",
            SessionState::Ended => "ended",
        })
    }
}

/// One completed request/response cycle.
#[derive(Debug, Clone)]
pub struct Turn {
    pub message: String,
    pub response: AssembledResponse,
    pub at: DateTime<Utc>,
}

/// A single conversation with a remote agent.
pub struct ConversationSession {
    transport: Arc<dyn AgentTransport>,
    classifier: ActivityClassifier,
    log: ConversationLog,
    credential: Option<Credential>,
    conversation_id: Option<String>,
    state: SessionState,
    turns: Vec<Turn>,
    turn_in_flight: bool,
    created_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(transport: Arc<dyn AgentTransport>, log: ConversationLog) -> Self {
        Self {
            transport,
            classifier: ActivityClassifier::new(),
            log,
            credential: None,
            conversation_id: None,
            state: SessionState::Unauthenticated,
            turns: Vec::new(),
            turn_in_flight: false,
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The id assigned by the agent; `None` until started.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Acquire a credential from `manager`.
    ///
    /// May be called again later to pick up a renewed credential; the state
    /// only advances from `Unauthenticated`.
    pub async fn authenticate(&mut self, manager: &TokenAcquisitionManager) -> Result<()> {
        if self.state == SessionState::Ended {
            return Err(self.closed());
        }
        let credential = manager.acquire().await?;
        tracing::debug!(mode = %credential.mode(), "session authenticated");
        self.credential = Some(credential);
        if self.state == SessionState::Unauthenticated {
            self.state = SessionState::Authenticated;
        }
        Ok(())
    }

    /// Open the remote conversation.
    ///
    /// Returns whatever the agent said on start (usually a greeting).
    pub async fn start(&mut self) -> Result<AssembledResponse> {
        match self.state {
            SessionState::Unauthenticated => return Err(ProtocolError::NotAuthenticated.into()),
            SessionState::Started => {
                return Err(ProtocolError::AlreadyStarted {
                    conversation_id: self.conversation_id.clone().unwrap_or_default(),
                }
                .into());
            }
            SessionState::Ended => return Err(self.closed()),
            SessionState::Authenticated => {}
        }
        let credential = self.credential.as_ref().ok_or(ProtocolError::NotAuthenticated)?;

        let opened = self
            .transport
            .open_conversation(credential)
            .await
            .map_err(|e| AgentError::transport(Stage::Start, None, e))?;

        let conversation_id = opened
            .conversation_id
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::NoConversationId)?;

        self.log.bind(&conversation_id).await?;
        self.log.record("=== CONVERSATION STARTED ===").await?;
        self.log
            .record(&format!("Conversation ID: {conversation_id}"))
            .await?;

        let mut assembler = ResponseAssembler::new();
        for activity in &opened.activities {
            self.log.record_activity(activity).await?;
            assembler.extend(self.classifier.classify(activity));
        }

        tracing::info!(conversation_id = %conversation_id, "conversation started");
        self.conversation_id = Some(conversation_id);
        self.state = SessionState::Started;
        Ok(assembler.finish())
    }

    /// Run one turn and return the assembled response.
    pub async fn send(&mut self, message: &str) -> Result<AssembledResponse> {
        match self.state {
            SessionState::Ended => return Err(self.closed()),
            SessionState::Started => {}
            state => return Err(ProtocolError::NotStarted { state }.into()),
        }
        let conversation_id = self
            .conversation_id
            .clone()
            .ok_or(ProtocolError::NoConversationId)?;

        if self.turn_in_flight {
            tracing::warn!(
                conversation_id = %conversation_id,
                "previous turn was abandoned mid-stream, ending session"
            );
            self.state = SessionState::Ended;
            return Err(ProtocolError::ConcurrentTurnNotAllowed { conversation_id }.into());
        }

        self.turn_in_flight = true;
        let outcome = self.run_turn(&conversation_id, message).await;
        self.turn_in_flight = false;

        let response = outcome?;
        self.turns.push(Turn {
            message: message.to_string(),
            response: response.clone(),
            at: Utc::now(),
        });
        Ok(response)
    }

    async fn run_turn(&self, conversation_id: &str, message: &str) -> Result<AssembledResponse> {
        let credential = self.credential.as_ref().ok_or(ProtocolError::NotAuthenticated)?;
        self.log.record_user_message(message).await?;

        let fail = |e: TransportError| AgentError::transport(Stage::Send, Some(conversation_id), e);
        let mut activities = self
            .transport
            .ask_question(conversation_id, credential, message)
            .await
            .map_err(fail)?;

        let mut assembler = ResponseAssembler::new();
        let mut count = 0usize;
        while let Some(activity) = activities.next().await {
            let activity: RawActivity = activity.map_err(fail)?;
            self.log.record_activity(&activity).await?;
            assembler.extend(self.classifier.classify(&activity));
            count += 1;
        }

        let response = assembler.finish();
        tracing::debug!(
            conversation_id = %conversation_id,
            activities = count,
            structured = response.is_structured(),
            "turn complete"
        );
        Ok(response)
    }

    /// End the session. Later sends fail with `SessionClosed`.
    pub async fn end(&mut self) -> Result<()> {
        if self.state == SessionState::Ended {
            return Ok(());
        }
        self.state = SessionState::Ended;
        if self.log.is_bound() {
            self.log.record("=== CONVERSATION ENDED ===").await?;
        }
        tracing::info!(
            conversation_id = self.conversation_id.as_deref().unwrap_or("<none>"),
            turns = self.turns.len(),
            "conversation ended"
        );
        Ok(())
    }

    fn closed(&self) -> AgentError {
        ProtocolError::SessionClosed {
            conversation_id: self.conversation_id.clone().unwrap_or_default(),
        }
        .into()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use agentlink_auth::{PassthroughSecret, SecretSource, PASSTHROUGH_SECRET_VAR};
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::assembler::ResponsePayload;
    use crate::transport::{ActivityStream, OpenedConversation};

    enum Reply {
        Activities(Vec<serde_json::Value>),
        Hang,
        Fail,
    }

    struct FakeTransport {
        conversation_id: Option<String>,
        reply: Reply,
    }

    #[async_trait]
    impl AgentTransport for FakeTransport {
        async fn open_conversation(
            &self,
            _credential: &Credential,
        ) -> std::result::Result<OpenedConversation, TransportError> {
            Ok(OpenedConversation {
                conversation_id: self.conversation_id.clone(),
                activities: vec![
                    serde_json::from_value(json!({"type": "message", "text": "Hello, how can I help?", "from": {"role": "bot"}}))
                        .unwrap(),
                ],
            })
        }

        async fn ask_question(
            &self,
            _conversation_id: &str,
            _credential: &Credential,
            _message: &str,
        ) -> std::result::Result<ActivityStream, TransportError> {
            match &self.reply {
                Reply::Activities(values) => {
                    let items: Vec<_> = values
                        .iter()
                        .map(|v| Ok(serde_json::from_value(v.clone()).unwrap()))
                        .collect();
                    Ok(stream::iter(items).boxed())
                }
                Reply::Hang => Ok(stream::pending().boxed()),
                Reply::Fail => Err(TransportError::Status {
                    status: 500,
                    body: "boom".to_string(),
                }),
            }
        }
    }

    fn manager() -> TokenAcquisitionManager {
        let mut secrets = HashMap::new();
        secrets.insert(PASSTHROUGH_SECRET_VAR.to_string(), "key".to_string());
        let secrets: Arc<dyn SecretSource> = Arc::new(secrets);
        TokenAcquisitionManager::from_strategy(Box::new(PassthroughSecret::new(secrets)))
    }

    fn session(dir: &tempfile::TempDir, conversation_id: Option<&str>, reply: Reply) -> ConversationSession {
        let transport = FakeTransport {
            conversation_id: conversation_id.map(String::from),
            reply,
        };
        ConversationSession::new(Arc::new(transport), ConversationLog::new(dir.path()))
    }

    async fn started(dir: &tempfile::TempDir, reply: Reply) -> ConversationSession {
        let mut s = session(dir, Some("conv-1"), reply);
        s.authenticate(&manager()).await.unwrap();
        s.start().await.unwrap();
        s
    }

    #[tokio::test]
    async fn lifecycle_reaches_started_with_greeting() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir, Some("conv-1"), Reply::Activities(vec![]));
        assert_eq!(s.state(), SessionState::Unauthenticated);

        s.authenticate(&manager()).await.unwrap();
        assert_eq!(s.state(), SessionState::Authenticated);

        let greeting = s.start().await.unwrap();
        assert_eq!(s.state(), SessionState::Started);
        assert_eq!(s.conversation_id(), Some("conv-1"));
        assert_eq!(greeting.body_text(), "Hello, how can I help?");
        assert!(dir.path().join("conversation_conv-1.log").exists());
    }

    #[tokio::test]
    async fn start_requires_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir, Some("conv-1"), Reply::Activities(vec![]));
        let err = s.start().await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(ProtocolError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn missing_conversation_id_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir, None, Reply::Activities(vec![]));
        s.authenticate(&manager()).await.unwrap();
        let err = s.start().await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(ProtocolError::NoConversationId)));
        assert_eq!(s.state(), SessionState::Authenticated);
        assert!(s.conversation_id().is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = started(&dir, Reply::Activities(vec![])).await;
        let err = s.start().await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(ProtocolError::AlreadyStarted { .. })));
        assert_eq!(s.conversation_id(), Some("conv-1"));
    }

    #[tokio::test]
    async fn send_before_start_is_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(&dir, Some("conv-1"), Reply::Activities(vec![]));
        let err = s.send("hi").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Protocol(ProtocolError::NotStarted {
                state: SessionState::Unauthenticated
            })
        ));
    }

    #[tokio::test]
    async fn turn_assembles_and_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = started(
            &dir,
            Reply::Activities(vec![
                json!({"type": "typing"}),
                json!({"type": "event", "name": "Reasoning", "value": {"thinking": "check docs"}}),
                json!({"type": "message", "text": "hi", "from": {"role": "user"}}),
                json!({"type": "message", "text": "{\"answer\": 42}", "from": {"role": "bot"}}),
            ]),
        )
        .await;

        let response = s.send("what is the answer?").await.unwrap();
        assert_eq!(response.payload(), &ResponsePayload::Structured(json!({"answer": 42})));
        assert_eq!(
            response.reasoning(),
            Some(&["[Reasoning]".to_string(), "[Thinking] check docs".to_string()][..])
        );
        assert_eq!(s.turns().len(), 1);
        assert_eq!(s.turns()[0].message, "what is the answer?");
        assert_eq!(s.state(), SessionState::Started);

        let log = std::fs::read_to_string(s.log().path()).unwrap();
        assert!(log.contains("USER: what is the answer?"));
        assert_eq!(log.matches("ACTIVITY: ").count(), 5);
    }

    #[tokio::test]
    async fn empty_turn_reports_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = started(&dir, Reply::Activities(vec![json!({"type": "typing"})])).await;
        let response = s.send("anyone?").await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn ended_session_rejects_every_send() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = started(&dir, Reply::Activities(vec![])).await;
        s.end().await.unwrap();
        s.end().await.unwrap();

        for message in ["hello", ""] {
            let err = s.send(message).await.unwrap_err();
            assert!(matches!(
                err,
                AgentError::Protocol(ProtocolError::SessionClosed { ref conversation_id }) if conversation_id == "conv-1"
            ));
        }
    }

    #[tokio::test]
    async fn abandoned_turn_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = started(&dir, Reply::Hang).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(20), s.send("first")).await;
        assert!(abandoned.is_err());

        let err = s.send("second").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::Protocol(ProtocolError::ConcurrentTurnNotAllowed { .. })
        ));
        assert_eq!(s.state(), SessionState::Ended);

        let err = s.send("third").await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(ProtocolError::SessionClosed { .. })));
    }

    #[tokio::test]
    async fn transport_failure_keeps_session_usable() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = started(&dir, Reply::Fail).await;

        let err = s.send("hello").await.unwrap_err();
        match err {
            AgentError::Transport {
                stage,
                conversation_id,
                source: TransportError::Status { status, .. },
            } => {
                assert_eq!(stage, Stage::Send);
                assert_eq!(conversation_id.as_deref(), Some("conv-1"));
                assert_eq!(status, 500);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(s.state(), SessionState::Started);
        assert!(matches!(
            s.send("again").await.unwrap_err(),
            AgentError::Transport { .. }
        ));
    }
}
