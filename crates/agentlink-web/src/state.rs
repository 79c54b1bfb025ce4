//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all handlers. It
//! owns every open conversation; each session sits behind its own mutex so
//! turns on different conversations run in parallel while turns on one
//! conversation are serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use agentlink_agent::{
    AgentLinkConfig, AgentTransport, AssembledResponse, ConversationLog, ConversationSession,
};
use agentlink_auth::TokenAcquisitionManager;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::api::ApiError;

/// A session shared between handlers.
pub type SharedSession = Arc<Mutex<ConversationSession>>;

/// Shared state accessible from every Axum handler.
pub struct AppState {
    /// Loaded configuration, used for reporting and log placement.
    pub config: Arc<AgentLinkConfig>,

    /// Credential source shared by all sessions.
    pub auth: Arc<TokenAcquisitionManager>,

    /// Transport every new session talks through.
    pub transport: Arc<dyn AgentTransport>,

    /// Open conversations keyed by conversation id.
    sessions: RwLock<HashMap<String, SharedSession>>,

    /// Set once a credential has been acquired.
    initialized: AtomicBool,

    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: Arc<AgentLinkConfig>,
        auth: Arc<TokenAcquisitionManager>,
        transport: Arc<dyn AgentTransport>,
    ) -> Self {
        Self {
            config,
            auth,
            transport,
            sessions: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    /// Whether any session has authenticated successfully.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Authenticate and start a new conversation, then register it.
    ///
    /// Returns the conversation id, the greeting, and the session itself.
    pub async fn open_session(
        &self,
    ) -> Result<(String, AssembledResponse, SharedSession), ApiError> {
        let mut session = ConversationSession::new(
            Arc::clone(&self.transport),
            ConversationLog::new(&self.config.logs_dir),
        );
        session.authenticate(&self.auth).await?;
        self.initialized.store(true, Ordering::Relaxed);

        let greeting = session.start().await?;
        let id = session
            .conversation_id()
            .map(String::from)
            .unwrap_or_default();

        let shared = Arc::new(Mutex::new(session));
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&shared));
        tracing::info!(conversation_id = %id, "conversation registered");
        Ok((id, greeting, shared))
    }

    /// Look up an open conversation.
    pub async fn session(&self, id: &str) -> Result<SharedSession, ApiError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    /// Unregister a conversation.
    pub async fn remove_session(&self, id: &str) -> Result<SharedSession, ApiError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    /// Every registered conversation, sorted by id.
    pub async fn sessions(&self) -> Vec<(String, SharedSession)> {
        let mut all: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), Arc::clone(s)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
