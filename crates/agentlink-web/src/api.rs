//! REST API route handlers.
//!
//! Provides endpoints for service status, one-shot messaging, and
//! conversation management. Errors are rendered as `{"error": "..."}` with
//! a status code chosen by [`ApiError::status`].

use std::sync::Arc;

use agentlink_agent::{
    AgentError, AssembledResponse, ProtocolError, ResponsePayload, SessionState, Turn,
};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body is unusable.
    #[error("{0}")]
    Validation(String),

    /// No open conversation has this id.
    #[error("conversation {0} not found")]
    NotFound(String),

    /// Another request is mid-turn on the same conversation.
    #[error("a turn is already in progress on conversation {0}")]
    Busy(String),

    /// The session reported an error.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Busy(_) => StatusCode::CONFLICT,
            ApiError::Agent(e) => match e {
                AgentError::Protocol(ProtocolError::ConcurrentTurnNotAllowed { .. }) => {
                    StatusCode::CONFLICT
                }
                AgentError::Protocol(ProtocolError::SessionClosed { .. }) => StatusCode::GONE,
                AgentError::Protocol(ProtocolError::NoConversationId)
                | AgentError::Auth(_)
                | AgentError::Transport { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

/// Service description.
pub async fn index(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": "agentlink",
        "version": env!("CARGO_PKG_VERSION"),
        "agent": state.config.agent.name,
        "endpoints": {
            "health": "GET /health",
            "message": "POST /message",
            "start_conversation": "POST /conversation/start",
            "get_conversation": "GET /conversation/{id}",
            "end_conversation": "DELETE /conversation/{id}",
            "list_conversations": "GET /conversations",
            "config": "GET /config",
        },
    }))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Response payload for the `/health` endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent: String,
    pub environment_id: String,
    pub initialized: bool,
    pub uptime_seconds: i64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        agent: state.config.agent.name.clone(),
        environment_id: state.config.agent.environment_id.clone(),
        initialized: state.is_initialized(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

// ---------------------------------------------------------------------------
// POST /message
// ---------------------------------------------------------------------------

/// Request body for the message endpoint.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    /// Continue this conversation; a new one is started when absent.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// One assembled agent answer.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Parsed JSON when the agent answered with an object, text otherwise.
    pub response: Value,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub thinking: Option<Vec<String>>,
    pub is_json: bool,
}

impl MessageResponse {
    fn new(conversation_id: String, response: &AssembledResponse, timestamp: DateTime<Utc>) -> Self {
        Self {
            response: payload_value(response),
            conversation_id,
            timestamp,
            thinking: response.reasoning().map(<[String]>::to_vec),
            is_json: response.is_structured(),
        }
    }
}

fn payload_value(response: &AssembledResponse) -> Value {
    match response.payload() {
        ResponsePayload::Structured(value) => value.clone(),
        _ => Value::String(response.body_text()),
    }
}

/// Send one message and return the agent's answer.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::Validation("message must not be empty".to_string()));
    }

    let (conversation_id, session) = match body.conversation_id.filter(|id| !id.is_empty()) {
        Some(id) => {
            let session = state.session(&id).await?;
            (id, session)
        }
        None => {
            let (id, _greeting, session) = state.open_session().await?;
            (id, session)
        }
    };

    let mut guard = session
        .try_lock()
        .map_err(|_| ApiError::Busy(conversation_id.clone()))?;
    let outcome = guard.send(&body.message).await;
    let response = match outcome {
        Ok(response) => response,
        Err(e) => {
            if guard.state() == SessionState::Ended {
                drop(guard);
                if state.remove_session(&conversation_id).await.is_ok() {
                    tracing::info!(conversation_id = %conversation_id, "dropped ended conversation");
                }
            }
            return Err(e.into());
        }
    };
    let timestamp = guard.turns().last().map_or_else(Utc::now, |t| t.at);

    Ok(Json(MessageResponse::new(conversation_id, &response, timestamp)))
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// Response for a newly started conversation.
#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub conversation_id: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    /// What the agent said on start, if anything.
    pub greeting: Option<String>,
}

/// POST /conversation/start
pub async fn start_conversation(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<StartResponse>), ApiError> {
    let (conversation_id, greeting, session) = state.open_session().await?;
    let created_at = session.lock().await.created_at();
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            conversation_id,
            status: "started",
            created_at,
            greeting: (!greeting.is_empty()).then(|| greeting.render()),
        }),
    ))
}

/// One turn of a conversation's history.
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub message: String,
    pub response: Value,
    pub thinking: Option<Vec<String>>,
    pub is_json: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&Turn> for TurnResponse {
    fn from(turn: &Turn) -> Self {
        Self {
            message: turn.message.clone(),
            response: payload_value(&turn.response),
            thinking: turn.response.reasoning().map(<[String]>::to_vec),
            is_json: turn.response.is_structured(),
            timestamp: turn.at,
        }
    }
}

/// A conversation and its history.
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<TurnResponse>,
}

/// GET /conversation/{id}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let session = state.session(&id).await?;
    let session = session.lock().await;
    Ok(Json(ConversationResponse {
        conversation_id: id,
        state: session.state().to_string(),
        created_at: session.created_at(),
        turns: session.turns().iter().map(TurnResponse::from).collect(),
    }))
}

/// DELETE /conversation/{id}: end the session and forget it.
pub async fn end_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.remove_session(&id).await?;
    let mut session = session.lock().await;
    session.end().await?;
    tracing::info!(conversation_id = %id, "conversation ended via API");
    Ok(Json(json!({ "conversation_id": id, "status": "ended" })))
}

/// Summary row for the conversation list.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    /// Session state, or `in_turn` while a turn holds the session.
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
    pub turns: Option<usize>,
}

/// GET /conversations
pub async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<Vec<ConversationSummary>> {
    let rows = state
        .sessions()
        .await
        .into_iter()
        .map(|(id, session)| {
            let row = match session.try_lock() {
                Ok(session) => ConversationSummary {
                    conversation_id: id,
                    state: session.state().to_string(),
                    created_at: Some(session.created_at()),
                    turns: Some(session.turns().len()),
                },
                Err(_) => ConversationSummary {
                    conversation_id: id,
                    state: "in_turn".to_string(),
                    created_at: None,
                    turns: None,
                },
            };
            row
        })
        .collect();
    Json(rows)
}

// ---------------------------------------------------------------------------
// GET /config
// ---------------------------------------------------------------------------

/// Configuration with identifiers masked.
pub async fn config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "agent_name": config.agent.name,
        "environment_id": config.agent.environment_id,
        "tenant_id": config.agent.tenant_id,
        "schema_name": config.agent.schema_name,
        "auth_mode": state.auth.mode().as_str(),
        "client_id": config.masked_client_id(),
        "cloud": config.api.cloud,
        "timeout_secs": config.api.timeout_secs,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
