//! RFC 8628 Device Authorization Grant.
//!
//! Used for interactive sign-in on hosts without a usable browser: the user
//! is shown a short code and a URL, completes sign-in on any device, and
//! this module polls the token endpoint until the grant is issued.
//!
//! # Flow Overview
//!
//! 1. Request a device code from the authority's `devicecode` endpoint.
//! 2. Show the `user_code` and `verification_uri` to the user.
//! 3. Poll the token endpoint until the user completes sign-in, declines,
//!    or the code expires.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::oauth::{Authority, OAuthTokens, TokenResponse};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a device authorization grant flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeConfig {
    /// The application (client) id.
    pub client_id: String,

    /// Tenant authority issuing the code.
    pub authority: Authority,

    /// The scopes to request.
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Response from the device authorization endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    /// The device verification code.
    pub device_code: String,

    /// The end-user verification code to display to the user.
    pub user_code: String,

    /// The URI the user should visit to enter the code.
    pub verification_uri: String,

    /// Human-readable instructions supplied by the server, if any.
    pub message: Option<String>,

    /// Lifetime of the device code in seconds.
    pub expires_in: u64,

    /// The minimum polling interval in seconds.
    pub interval: u64,
}

/// Raw device authorization response from the server.
///
/// Some servers use `verification_url` instead of `verification_uri`.
#[derive(Debug, Deserialize)]
struct RawDeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: Option<String>,
    verification_url: Option<String>,
    message: Option<String>,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

/// Error response from the token endpoint during polling.
#[derive(Debug, Deserialize)]
struct PollErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// What to do after a non-success poll response.
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Pending,
    SlowDown,
    Failed(String),
}

fn classify_poll_error(error: &PollErrorResponse) -> PollOutcome {
    match error.error.as_str() {
        "authorization_pending" => PollOutcome::Pending,
        "slow_down" => PollOutcome::SlowDown,
        "authorization_declined" | "access_denied" => {
            PollOutcome::Failed("user declined the sign-in request".to_string())
        }
        "expired_token" => PollOutcome::Failed(
            "device code expired before the user completed sign-in".to_string(),
        ),
        other => PollOutcome::Failed(
            error
                .error_description
                .clone()
                .unwrap_or_else(|| format!("device code poll error: {other}")),
        ),
    }
}

// ---------------------------------------------------------------------------
// Device code flow
// ---------------------------------------------------------------------------

/// Drives one RFC 8628 device authorization grant.
pub struct DeviceCodeFlow {
    config: DeviceCodeConfig,
    client: reqwest::Client,
}

impl DeviceCodeFlow {
    /// Create a new device code flow with the given configuration.
    pub fn new(config: DeviceCodeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Request a device code from the authority.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Network`] on transport failure, or
    /// [`AuthError::FlowFailed`] if the server returns an error.
    pub async fn request_device_code(&self) -> Result<DeviceCodeResponse> {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
        ];

        let url = self.config.authority.device_code_url();
        tracing::debug!(device_auth_url = %url, "requesting device code");

        let response = self.client.post(&url).form(&params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::FlowFailed {
                reason: format!("device code request failed: HTTP {status}: {body}"),
            });
        }

        let raw: RawDeviceCodeResponse = response.json().await?;

        let verification_uri = raw
            .verification_uri
            .or(raw.verification_url)
            .ok_or_else(|| AuthError::FlowFailed {
                reason: "device code response missing verification_uri".to_string(),
            })?;

        Ok(DeviceCodeResponse {
            device_code: raw.device_code,
            user_code: raw.user_code,
            verification_uri,
            message: raw.message,
            expires_in: raw.expires_in,
            interval: raw.interval,
        })
    }

    /// Poll the token endpoint until the user completes sign-in.
    ///
    /// Polls every `interval` seconds (increasing by five on `slow_down`)
    /// and gives up after `timeout` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InteractiveAuthFailed`] if the user declines or
    /// the code expires, or [`AuthError::SignInTimeout`] once `timeout`
    /// seconds elapse.
    pub async fn poll_for_token(
        &self,
        device_code: &str,
        interval: u64,
        timeout: u64,
    ) -> Result<OAuthTokens> {
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(timeout);
        let mut current_interval = interval;
        let token_url = self.config.authority.token_url();

        tracing::debug!(
            interval = current_interval,
            timeout = timeout,
            "polling for device code token"
        );

        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(current_interval)).await;

            if tokio::time::Instant::now() >= deadline {
                return Err(AuthError::SignInTimeout {
                    timeout_secs: timeout,
                });
            }

            let params = [
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", device_code),
                ("client_id", self.config.client_id.as_str()),
            ];

            let response = self.client.post(&token_url).form(&params).send().await?;
            let status = response.status();

            if status.is_success() {
                let token: TokenResponse = response.json().await?;
                tracing::info!("device code sign-in completed");
                return Ok(token.into_tokens());
            }

            let body = response.text().await.unwrap_or_default();
            let poll_error = serde_json::from_str::<PollErrorResponse>(&body).map_err(|_| {
                AuthError::FlowFailed {
                    reason: format!("unexpected token response: HTTP {status}: {body}"),
                }
            })?;

            match classify_poll_error(&poll_error) {
                PollOutcome::Pending => {
                    tracing::trace!("authorization pending, will retry");
                }
                PollOutcome::SlowDown => {
                    // RFC 8628 section 3.5.
                    current_interval += 5;
                    tracing::debug!(
                        new_interval = current_interval,
                        "slow_down received, increasing poll interval"
                    );
                }
                PollOutcome::Failed(detail) => {
                    return Err(AuthError::InteractiveAuthFailed { detail });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
