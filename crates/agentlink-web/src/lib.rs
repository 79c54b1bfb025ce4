//! HTTP interface for agentlink.
//!
//! Exposes conversation sessions over a small JSON API:
//!
//! - `POST /message` sends one turn, starting a conversation if needed.
//! - `/conversation/...` and `/conversations` start, inspect, and end
//!   conversations.
//! - `/health` and `/config` report service state with identifiers masked.
//!
//! Sessions live in [`AppState`], owned by the server.

pub mod api;
pub mod server;
pub mod state;

pub use api::ApiError;
pub use server::WebServer;
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8000,
        }
    }
}
