//! The identity platform as seen by the acquisition strategies.
//!
//! [`IdentityClient`] is the seam between strategy logic (cache handling,
//! fallback order, persistence) and the network grants. Strategies only
//! ever talk to the trait; [`EntraIdentityClient`] is the real
//! implementation backed by [`OAuthFlow`], [`DeviceCodeFlow`], and the
//! loopback [`CallbackServer`].

use async_trait::async_trait;

use crate::callback::CallbackServer;
use crate::device_code::{DeviceCodeConfig, DeviceCodeFlow};
use crate::error::{AuthError, Result};
use crate::oauth::{Authority, OAuthConfig, OAuthFlow, OAuthTokens, generate_pkce_verifier, pkce_challenge};
use crate::{AuthSettings, InteractiveFlow};

/// How long the loopback listener waits for the browser redirect.
pub const BROWSER_SIGN_IN_TIMEOUT_SECS: u64 = 600;

/// Upper bound on device code polling, regardless of the code's lifetime.
pub const DEVICE_CODE_MAX_WAIT_SECS: u64 = 900;

/// Scopes added to interactive grants so a refresh token and id token are
/// issued alongside the access token.
const INTERACTIVE_EXTRA_SCOPES: &[&str] = &["offline_access", "openid", "profile"];

/// Grants the strategies can request.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Client-credentials grant with the given secret.
    async fn client_credentials(&self, client_secret: &str) -> Result<OAuthTokens>;

    /// Redeem a refresh token without user interaction.
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens>;

    /// Run an interactive sign-in and return the resulting tokens.
    async fn sign_in(&self) -> Result<OAuthTokens>;
}

/// [`IdentityClient`] against the Microsoft identity platform.
pub struct EntraIdentityClient {
    confidential: OAuthFlow,
    public: OAuthFlow,
    device: DeviceCodeFlow,
    interactive: InteractiveFlow,
    callback_port: u16,
}

impl EntraIdentityClient {
    /// Build grants for the application and tenant in `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if no client id is configured.
    pub fn new(settings: &AuthSettings) -> Result<Self> {
        let client_id = settings.require_client_id()?.to_string();
        let authority = Authority::new(settings.tenant_id.clone());
        let redirect_uri = format!("http://localhost:{}", settings.callback_port);

        let mut interactive_scopes = settings.scopes.clone();
        for extra in INTERACTIVE_EXTRA_SCOPES {
            if !interactive_scopes.iter().any(|s| s == extra) {
                interactive_scopes.push((*extra).to_string());
            }
        }

        Ok(Self {
            confidential: OAuthFlow::new(OAuthConfig {
                client_id: client_id.clone(),
                authority: authority.clone(),
                redirect_uri: redirect_uri.clone(),
                scopes: settings.scopes.clone(),
            }),
            public: OAuthFlow::new(OAuthConfig {
                client_id: client_id.clone(),
                authority: authority.clone(),
                redirect_uri,
                scopes: interactive_scopes.clone(),
            }),
            device: DeviceCodeFlow::new(DeviceCodeConfig {
                client_id,
                authority,
                scopes: interactive_scopes,
            }),
            interactive: settings.interactive,
            callback_port: settings.callback_port,
        })
    }

    async fn sign_in_browser(&self) -> Result<OAuthTokens> {
        let verifier = generate_pkce_verifier()?;
        let challenge = pkce_challenge(&verifier);
        let state = uuid::Uuid::now_v7().to_string();
        let url = self.public.authorization_url(&state, &challenge)?;

        tracing::info!(url = %url, "open this URL in a browser to sign in");

        let (code, returned_state) =
            CallbackServer::start(self.callback_port, BROWSER_SIGN_IN_TIMEOUT_SECS).await?;
        if returned_state != state {
            return Err(AuthError::FlowFailed {
                reason: "redirect state does not match the sign-in request".to_string(),
            });
        }

        self.public.exchange_code(&code, &verifier).await
    }

    async fn sign_in_device_code(&self) -> Result<OAuthTokens> {
        let code = self.device.request_device_code().await?;

        match &code.message {
            Some(message) => tracing::info!("{message}"),
            None => tracing::info!(
                verification_uri = %code.verification_uri,
                user_code = %code.user_code,
                "visit the verification URI and enter the code to sign in"
            ),
        }

        let timeout = code.expires_in.min(DEVICE_CODE_MAX_WAIT_SECS);
        self.device
            .poll_for_token(&code.device_code, code.interval.max(1), timeout)
            .await
    }
}

#[async_trait]
impl IdentityClient for EntraIdentityClient {
    async fn client_credentials(&self, client_secret: &str) -> Result<OAuthTokens> {
        self.confidential.client_credentials(client_secret).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens> {
        self.public.refresh_token(refresh_token).await
    }

    async fn sign_in(&self) -> Result<OAuthTokens> {
        match self.interactive {
            InteractiveFlow::Browser => self.sign_in_browser().await,
            InteractiveFlow::DeviceCode => self.sign_in_device_code().await,
        }
    }
}
