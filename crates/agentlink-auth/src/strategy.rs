//! Credential acquisition strategies.
//!
//! Each [`AuthMode`] has one [`TokenStrategy`]. Strategies are stateless
//! apart from the interactive one, which serializes acquisitions so the
//! load, renew, persist sequence never interleaves within a process.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cache::TokenCache;
use crate::error::{AuthError, Result};
use crate::identity::IdentityClient;
use crate::oauth::OAuthTokens;
use crate::secrets::{CLIENT_SECRET_VAR, PASSTHROUGH_SECRET_VAR, SecretSource};
use crate::store::TokenStore;
use crate::{AuthMode, Credential};

/// Produces a credential for one [`AuthMode`].
#[async_trait]
pub trait TokenStrategy: Send + Sync {
    /// The mode this strategy implements.
    fn mode(&self) -> AuthMode;

    /// Obtain a credential, performing whatever grants are needed.
    async fn acquire(&self) -> Result<Credential>;
}

// ---------------------------------------------------------------------------
// Passthrough secret
// ---------------------------------------------------------------------------

/// Hands back a fixed secret from the environment.
pub struct PassthroughSecret {
    secrets: Arc<dyn SecretSource>,
}

impl PassthroughSecret {
    pub fn new(secrets: Arc<dyn SecretSource>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl TokenStrategy for PassthroughSecret {
    fn mode(&self) -> AuthMode {
        AuthMode::PassthroughSecret
    }

    async fn acquire(&self) -> Result<Credential> {
        let secret = self
            .secrets
            .secret(PASSTHROUGH_SECRET_VAR)
            .ok_or_else(|| AuthError::MissingSecret {
                variable: PASSTHROUGH_SECRET_VAR.to_string(),
            })?;
        tracing::debug!("using passthrough secret");
        Ok(Credential::new(secret, None, AuthMode::PassthroughSecret))
    }
}

// ---------------------------------------------------------------------------
// Client credentials
// ---------------------------------------------------------------------------

/// Client-credentials grant. Tokens are never written to disk.
pub struct ClientCredentials {
    identity: Arc<dyn IdentityClient>,
    secrets: Arc<dyn SecretSource>,
}

impl ClientCredentials {
    pub fn new(identity: Arc<dyn IdentityClient>, secrets: Arc<dyn SecretSource>) -> Self {
        Self { identity, secrets }
    }
}

#[async_trait]
impl TokenStrategy for ClientCredentials {
    fn mode(&self) -> AuthMode {
        AuthMode::ClientCredentials
    }

    async fn acquire(&self) -> Result<Credential> {
        let secret = self
            .secrets
            .secret(CLIENT_SECRET_VAR)
            .ok_or_else(|| AuthError::MissingSecret {
                variable: CLIENT_SECRET_VAR.to_string(),
            })?;

        let tokens = self
            .identity
            .client_credentials(&secret)
            .await
            .map_err(|e| match e {
                err @ AuthError::GrantRejected { .. } => err,
                other => AuthError::GrantRejected {
                    detail: other.to_string(),
                },
            })?;

        tracing::info!("acquired token via client credentials");
        Ok(credential_from(&tokens, AuthMode::ClientCredentials))
    }
}

// ---------------------------------------------------------------------------
// Interactive with persisted cache
// ---------------------------------------------------------------------------

/// Silent renewal from the persisted cache, falling back to interactive
/// sign-in. The cache is written back only when it changed.
pub struct InteractiveCached {
    client_id: String,
    tenant_id: String,
    scopes: Vec<String>,
    store: TokenStore,
    identity: Arc<dyn IdentityClient>,
    lock: Mutex<()>,
}

impl InteractiveCached {
    pub fn new(
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        scopes: Vec<String>,
        store: TokenStore,
        identity: Arc<dyn IdentityClient>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            scopes,
            store,
            identity,
            lock: Mutex::new(()),
        }
    }

    /// Try the cached access token, then the refresh token, of the first
    /// matching account. `None` means interactive sign-in is needed.
    async fn acquire_silent(&self, cache: &mut TokenCache) -> Option<Credential> {
        let account = cache
            .accounts(&self.client_id, &self.tenant_id)
            .first()
            .map(|a| (*a).clone())?;

        if let Some(token) = cache.valid_access_token(&account.home_account_id, &self.scopes) {
            tracing::debug!(account = %account.home_account_id, "using cached access token");
            return Some(Credential::from_unix_expiry(
                token.secret.clone(),
                token.expires_at,
                AuthMode::InteractiveCached,
            ));
        }

        let Some(refresh_token) = account.refresh_token.as_deref() else {
            tracing::debug!(account = %account.home_account_id, "cached account has no refresh token");
            return None;
        };

        match self.identity.refresh(refresh_token).await {
            Ok(tokens) => {
                cache.record_tokens(
                    &self.client_id,
                    &self.tenant_id,
                    &self.scopes,
                    &tokens,
                    Some(&account.home_account_id),
                );
                tracing::info!(account = %account.home_account_id, "renewed token silently");
                Some(credential_from(&tokens, AuthMode::InteractiveCached))
            }
            Err(AuthError::GrantRejected { detail }) => {
                tracing::warn!(
                    account = %account.home_account_id,
                    detail = %detail,
                    "refresh token rejected, forgetting account"
                );
                cache.remove_account(&account.home_account_id);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "silent renewal failed");
                None
            }
        }
    }

    async fn acquire_interactive(&self, cache: &mut TokenCache) -> Result<Credential> {
        tracing::info!("interactive sign-in required");
        let tokens = self
            .identity
            .sign_in()
            .await
            .map_err(AuthError::into_interactive)?;

        let account = cache.record_tokens(&self.client_id, &self.tenant_id, &self.scopes, &tokens, None);
        tracing::info!(account = %account, "interactive sign-in completed");
        Ok(credential_from(&tokens, AuthMode::InteractiveCached))
    }
}

#[async_trait]
impl TokenStrategy for InteractiveCached {
    fn mode(&self) -> AuthMode {
        AuthMode::InteractiveCached
    }

    async fn acquire(&self) -> Result<Credential> {
        let _guard = self.lock.lock().await;

        let mut cache = self.store.load()?.unwrap_or_default();

        let outcome = match self.acquire_silent(&mut cache).await {
            Some(credential) => Ok(credential),
            None => self.acquire_interactive(&mut cache).await,
        };

        // A rejected refresh token is forgotten even when sign-in fails. A
        // failed write never replaces the outcome of acquisition.
        if let Err(e) = self.store.persist(&mut cache) {
            tracing::warn!(
                path = %self.store.path().display(),
                error = %e,
                "failed to save token cache"
            );
        }
        outcome
    }
}

fn credential_from(tokens: &OAuthTokens, mode: AuthMode) -> Credential {
    Credential::from_unix_expiry(tokens.access_token.clone(), tokens.expires_at, mode)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
