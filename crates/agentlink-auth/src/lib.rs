//! Credential acquisition for agentlink.
//!
//! This crate produces the bearer credential a conversation transport
//! presents to the remote agent. Three strategies are available, selected
//! by [`AuthMode`]:
//!
//! - **passthrough-secret**: a fixed secret from the environment is used
//!   as-is.
//! - **client-credentials**: an OAuth client-credentials grant with a
//!   secret from the environment. Never cached on disk.
//! - **interactive-cached**: silent renewal from a persisted
//!   [`TokenCache`], falling back to browser or device code sign-in.
//!
//! # Architecture
//!
//! ```text
//! TokenAcquisitionManager
//! └── TokenStrategy (selected by AuthMode)
//!     ├── PassthroughSecret  ── SecretSource
//!     ├── ClientCredentials  ── IdentityClient ── OAuthFlow
//!     └── InteractiveCached  ── TokenStore (TokenCache file)
//!                            └─ IdentityClient ── OAuthFlow + CallbackServer
//!                                              └─ DeviceCodeFlow
//! ```

pub mod cache;
pub mod callback;
pub mod device_code;
pub mod error;
pub mod identity;
pub mod manager;
pub mod oauth;
pub mod secrets;
pub mod store;
pub mod strategy;

pub use cache::{CachedAccount, TokenCache};
pub use callback::CallbackServer;
pub use device_code::{DeviceCodeConfig, DeviceCodeFlow, DeviceCodeResponse};
pub use error::{AuthError, Result};
pub use identity::{EntraIdentityClient, IdentityClient};
pub use manager::TokenAcquisitionManager;
pub use oauth::{Authority, OAuthConfig, OAuthFlow, OAuthTokens};
pub use secrets::{CLIENT_SECRET_VAR, PASSTHROUGH_SECRET_VAR, ProcessEnv, SecretSource};
pub use store::TokenStore;
pub use strategy::{ClientCredentials, InteractiveCached, PassthroughSecret, TokenStrategy};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resource scope for the Power Platform API.
pub const DEFAULT_SCOPE: &str = "https://api.powerplatform.com/.default";

/// Default loopback port for browser sign-in redirects.
pub const DEFAULT_CALLBACK_PORT: u16 = 8400;

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// How a credential is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// A fixed secret from the environment, passed straight through.
    #[serde(alias = "directline")]
    PassthroughSecret,
    /// OAuth client-credentials grant.
    #[serde(alias = "client_credentials")]
    ClientCredentials,
    /// Cached silent renewal with interactive fallback.
    #[serde(alias = "interactive")]
    InteractiveCached,
}

impl AuthMode {
    /// Canonical configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::PassthroughSecret => "passthrough-secret",
            AuthMode::ClientCredentials => "client-credentials",
            AuthMode::InteractiveCached => "interactive-cached",
        }
    }

    /// Whether the mode needs an application (client) id.
    pub fn requires_client_id(self) -> bool {
        !matches!(self, AuthMode::PassthroughSecret)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough-secret" | "passthrough_secret" | "directline" => {
                Ok(AuthMode::PassthroughSecret)
            }
            "client-credentials" | "client_credentials" => Ok(AuthMode::ClientCredentials),
            "interactive-cached" | "interactive_cached" | "interactive" => {
                Ok(AuthMode::InteractiveCached)
            }
            other => Err(AuthError::InvalidConfig {
                reason: format!(
                    "unknown auth mode '{other}', expected one of: passthrough-secret, client-credentials, interactive-cached"
                ),
            }),
        }
    }
}

/// Which interactive sign-in the cached strategy falls back to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveFlow {
    /// Authorization code + PKCE with a loopback redirect.
    #[default]
    Browser,
    /// RFC 8628 device code.
    DeviceCode,
}

impl FromStr for InteractiveFlow {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" => Ok(InteractiveFlow::Browser),
            "device_code" | "device-code" | "device" => Ok(InteractiveFlow::DeviceCode),
            other => Err(AuthError::InvalidConfig {
                reason: format!("unknown interactive flow '{other}', expected browser or device_code"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything the manager needs to pick and run a strategy.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Selected strategy.
    pub mode: AuthMode,
    /// Directory (tenant) id.
    pub tenant_id: String,
    /// Application (client) id; required except for passthrough.
    pub client_id: Option<String>,
    /// Resource scopes to request.
    pub scopes: Vec<String>,
    /// Interactive sign-in method.
    pub interactive: InteractiveFlow,
    /// Loopback port for browser sign-in.
    pub callback_port: u16,
}

impl AuthSettings {
    /// Settings with default scope, browser sign-in, and callback port.
    pub fn new(mode: AuthMode, tenant_id: impl Into<String>, client_id: Option<String>) -> Self {
        Self {
            mode,
            tenant_id: tenant_id.into(),
            client_id,
            scopes: vec![DEFAULT_SCOPE.to_string()],
            interactive: InteractiveFlow::default(),
            callback_port: DEFAULT_CALLBACK_PORT,
        }
    }

    /// The client id, or [`AuthError::InvalidConfig`] if the mode needs one
    /// and none is set.
    pub fn require_client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthError::InvalidConfig {
                reason: format!("client id is required for auth mode '{}'", self.mode),
            })
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A bearer credential and the strategy that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
    mode: AuthMode,
}

impl Credential {
    /// Wrap a token produced by `mode`.
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>, mode: AuthMode) -> Self {
        Self {
            token: token.into(),
            expires_at,
            mode,
        }
    }

    /// Build from a unix-seconds expiry.
    pub fn from_unix_expiry(token: impl Into<String>, expires_at: Option<i64>, mode: AuthMode) -> Self {
        Self::new(
            token,
            expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            mode,
        )
    }

    /// The bearer token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the token stops being valid, if known.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Strategy that produced the credential.
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Whether the credential is expired or about to be.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| oauth::is_expired_at(at.timestamp()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("mode", &self.mode)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_mode_parses_aliases() {
        assert_eq!("directline".parse::<AuthMode>().unwrap(), AuthMode::PassthroughSecret);
        assert_eq!(
            "client_credentials".parse::<AuthMode>().unwrap(),
            AuthMode::ClientCredentials
        );
        assert_eq!("Interactive".parse::<AuthMode>().unwrap(), AuthMode::InteractiveCached);
        assert!("none".parse::<AuthMode>().is_err());
    }

    #[test]
    fn auth_mode_serde_names() {
        let json = serde_json::to_string(&AuthMode::InteractiveCached).unwrap();
        assert_eq!(json, "\"interactive-cached\"");
        let mode: AuthMode = serde_json::from_str("\"directline\"").unwrap();
        assert_eq!(mode, AuthMode::PassthroughSecret);
    }

    #[test]
    fn interactive_flow_parses() {
        assert_eq!(
            "device_code".parse::<InteractiveFlow>().unwrap(),
            InteractiveFlow::DeviceCode
        );
        assert_eq!("browser".parse::<InteractiveFlow>().unwrap(), InteractiveFlow::Browser);
    }

    #[test]
    fn require_client_id_rejects_empty() {
        let settings = AuthSettings::new(AuthMode::ClientCredentials, "t", Some(String::new()));
        assert!(matches!(
            settings.require_client_id(),
            Err(AuthError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn credential_debug_redacts_token() {
        let credential = Credential::new("super-secret", None, AuthMode::PassthroughSecret);
        let debug = format!("{credential:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn credential_expiry() {
        let now = Utc::now().timestamp();
        let fresh = Credential::from_unix_expiry("t", Some(now + 3600), AuthMode::InteractiveCached);
        let stale = Credential::from_unix_expiry("t", Some(now - 1), AuthMode::InteractiveCached);
        let forever = Credential::new("t", None, AuthMode::PassthroughSecret);
        assert!(!fresh.is_expired());
        assert!(stale.is_expired());
        assert!(!forever.is_expired());
    }
}
