//! Conversation sessions with a remote Copilot Studio agent.
//!
//! The agent answers each turn with a stream of loosely-typed activities.
//! This crate classifies those activities and reassembles them into one
//! response per turn: the visible answer (text, or a parsed JSON object)
//! plus any reasoning the agent surfaced along the way.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐  acquire   ┌─────────────────────────┐
//! │ ConversationSession │───────────>│ TokenAcquisitionManager │
//! └──────────┬──────────┘            └─────────────────────────┘
//!            │ open / ask
//!     ┌──────┴────────┐   SSE   ┌────────────────────┐
//!     │ AgentTransport│<────────│ Copilot Studio API │
//!     └──────┬────────┘         └────────────────────┘
//!            │ RawActivity*
//!   ┌────────┴───────────┐     ┌───────────────────┐
//!   │ ActivityClassifier │────>│ ResponseAssembler │──> AssembledResponse
//!   └────────────────────┘     └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`activity`] -- Activity wire model and its closed view.
//! - [`classifier`] -- Activity to fragment classification rules.
//! - [`assembler`] -- Fragment assembly into one response.
//! - [`session`] -- Conversation lifecycle.
//! - [`transport`] -- The transport seam; [`copilot`] implements it.
//! - [`sse`] -- Server-sent events decoding.
//! - [`log`] -- Per-conversation diagnostic log.
//! - [`config`] -- File and environment configuration.
//! - [`error`] -- Error types.

pub mod activity;
pub mod assembler;
pub mod classifier;
pub mod config;
pub mod copilot;
pub mod error;
pub mod log;
pub mod session;
pub mod sse;
pub mod transport;

pub use activity::{ActivityView, RawActivity};
pub use assembler::{AssembledResponse, NO_RESPONSE_TEXT, ResponseAssembler, ResponsePayload};
pub use classifier::{ActivityClassifier, ClassifiedFragment};
pub use config::AgentLinkConfig;
pub use copilot::{ConnectionSettings, CopilotStudioTransport, PowerPlatformCloud};
pub use error::{AgentError, ConfigError, ProtocolError, Result, Stage, TransportError};
pub use log::ConversationLog;
pub use session::{ConversationSession, SessionState, Turn};
pub use transport::{ActivityStream, AgentTransport, OpenedConversation};
