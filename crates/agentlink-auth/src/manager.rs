//! Strategy selection and credential memoization.
//!
//! [`TokenAcquisitionManager`] is the single entry point sessions use. It
//! builds the strategy matching the configured [`AuthMode`] and keeps the
//! most recent credential until it is about to expire.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::identity::{EntraIdentityClient, IdentityClient};
use crate::secrets::SecretSource;
use crate::store::TokenStore;
use crate::strategy::{ClientCredentials, InteractiveCached, PassthroughSecret, TokenStrategy};
use crate::{AuthMode, AuthSettings, Credential};

/// Selects a strategy by mode and hands out credentials.
pub struct TokenAcquisitionManager {
    strategy: Box<dyn TokenStrategy>,
    current: Mutex<Option<Credential>>,
}

impl TokenAcquisitionManager {
    /// Manager talking to the real identity platform.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`](crate::AuthError::InvalidConfig)
    /// if the mode needs a client id and none is configured.
    pub fn new(
        settings: &AuthSettings,
        store: TokenStore,
        secrets: Arc<dyn SecretSource>,
    ) -> Result<Self> {
        let identity: Arc<dyn IdentityClient> = match settings.mode {
            AuthMode::PassthroughSecret => Arc::new(NoIdentity),
            _ => Arc::new(EntraIdentityClient::new(settings)?),
        };
        Self::with_identity(settings, store, identity, secrets)
    }

    /// Manager with a caller-supplied identity client.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_identity(
        settings: &AuthSettings,
        store: TokenStore,
        identity: Arc<dyn IdentityClient>,
        secrets: Arc<dyn SecretSource>,
    ) -> Result<Self> {
        let strategy: Box<dyn TokenStrategy> = match settings.mode {
            AuthMode::PassthroughSecret => Box::new(PassthroughSecret::new(secrets)),
            AuthMode::ClientCredentials => {
                settings.require_client_id()?;
                Box::new(ClientCredentials::new(identity, secrets))
            }
            AuthMode::InteractiveCached => Box::new(InteractiveCached::new(
                settings.require_client_id()?,
                settings.tenant_id.clone(),
                settings.scopes.clone(),
                store,
                identity,
            )),
        };

        tracing::debug!(mode = %settings.mode, "token acquisition strategy selected");
        Ok(Self::from_strategy(strategy))
    }

    /// Wrap an already-built strategy.
    pub fn from_strategy(strategy: Box<dyn TokenStrategy>) -> Self {
        Self {
            strategy,
            current: Mutex::new(None),
        }
    }

    /// The active mode.
    pub fn mode(&self) -> AuthMode {
        self.strategy.mode()
    }

    /// A usable credential, reusing the last one while it is fresh.
    ///
    /// # Errors
    ///
    /// Propagates the strategy's error; nothing is memoized on failure.
    pub async fn acquire(&self) -> Result<Credential> {
        let mut current = self.current.lock().await;
        if let Some(credential) = current.as_ref().filter(|c| !c.is_expired()) {
            tracing::trace!("reusing memoized credential");
            return Ok(credential.clone());
        }

        let credential = self.strategy.acquire().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Forget the memoized credential so the next acquire runs the strategy.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}

/// Placeholder for modes that never contact the identity platform.
struct NoIdentity;

#[async_trait::async_trait]
impl IdentityClient for NoIdentity {
    async fn client_credentials(&self, _client_secret: &str) -> Result<crate::OAuthTokens> {
        Err(unsupported())
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<crate::OAuthTokens> {
        Err(unsupported())
    }

    async fn sign_in(&self) -> Result<crate::OAuthTokens> {
        Err(unsupported())
    }
}

fn unsupported() -> crate::AuthError {
    crate::AuthError::InvalidConfig {
        reason: "passthrough mode has no identity client".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
