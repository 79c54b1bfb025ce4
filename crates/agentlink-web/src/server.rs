//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and runs
//! the HTTP listener until Ctrl-C.

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::WebConfig;
use crate::api;
use crate::state::AppState;

/// The agentlink web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: WebConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Start the server and block until it is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> std::io::Result<()> {
        let addr = self.addr();
        let router = router(Arc::clone(&self.state));

        tracing::info!(addr = %addr, agent = %self.state.config.agent.name, "starting web server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let open = self.state.sessions().await;
        for (id, session) in open {
            if let Err(e) = session.lock().await.end().await {
                tracing::warn!(conversation_id = %id, error = %e, "failed to close conversation");
            }
        }
        tracing::info!("web server stopped");
        Ok(())
    }
}

/// Build the Axum router with all routes registered.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(api::index))
        .route("/health", get(api::health))
        .route("/config", get(api::config))
        .route("/message", post(api::send_message))
        // Conversation management.
        .route("/conversation/start", post(api::start_conversation))
        .route(
            "/conversation/{id}",
            get(api::get_conversation).delete(api::end_conversation),
        )
        .route("/conversations", get(api::list_conversations))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
