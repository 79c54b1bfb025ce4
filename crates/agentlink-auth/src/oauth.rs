//! OAuth 2.0 grants against the Microsoft identity platform.
//!
//! This module implements the token endpoint interactions used by the
//! acquisition strategies:
//!
//! - authorization code exchange with PKCE (RFC 7636) for browser sign-in,
//! - the refresh-token grant used for silent renewal,
//! - the client-credentials grant used for service principals.
//!
//! Endpoints are derived from an [`Authority`] (login host + tenant).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Length of the PKCE code verifier in bytes (before base64 encoding).
const PKCE_VERIFIER_BYTES: usize = 32;

/// Public cloud login host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tokens within this many seconds of expiry are treated as expired.
pub const EXPIRY_SKEW_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Authority
// ---------------------------------------------------------------------------

/// A tenant-scoped authority on the identity platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    /// Login host, e.g. `https://login.microsoftonline.com`.
    pub host: String,
    /// Directory (tenant) id or domain.
    pub tenant: String,
}

impl Authority {
    /// Authority on the public cloud login host.
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_AUTHORITY_HOST.to_string(),
            tenant: tenant.into(),
        }
    }

    fn endpoint(&self, leaf: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{leaf}",
            self.host.trim_end_matches('/'),
            self.tenant
        )
    }

    /// The authorization endpoint.
    pub fn authorize_url(&self) -> String {
        self.endpoint("authorize")
    }

    /// The token endpoint.
    pub fn token_url(&self) -> String {
        self.endpoint("token")
    }

    /// The device authorization endpoint (RFC 8628).
    pub fn device_code_url(&self) -> String {
        self.endpoint("devicecode")
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for grants issued on behalf of one application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// The application (client) id.
    pub client_id: String,

    /// Tenant authority the grants are issued against.
    pub authority: Authority,

    /// Redirect URI for the authorization code flow.
    pub redirect_uri: String,

    /// The scopes to request.
    pub scopes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

/// Tokens returned by the token endpoint after a successful grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token used to authenticate API requests.
    pub access_token: String,

    /// The refresh token used to obtain new access tokens.
    pub refresh_token: Option<String>,

    /// OpenID Connect id token identifying the signed-in account.
    #[serde(default)]
    pub id_token: Option<String>,

    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: Option<i64>,

    /// The token type (typically "Bearer").
    pub token_type: String,

    /// The scopes that were granted.
    pub scopes: Vec<String>,
}

/// Raw token response from the token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    /// Convert into [`OAuthTokens`], computing `expires_at` from `expires_in`.
    pub(crate) fn into_tokens(self) -> OAuthTokens {
        let expires_at = self
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs);

        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        OAuthTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            expires_at,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scopes,
        }
    }
}

/// Raw error response from the token endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub(crate) error: String,
    pub(crate) error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// Id token claims
// ---------------------------------------------------------------------------

/// The id token claims used to identify a cached account.
///
/// The signature is not verified: the token arrived over TLS straight from
/// the token endpoint and is only used as a cache key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    /// Object id of the user.
    pub oid: Option<String>,
    /// Tenant id the user signed in to.
    pub tid: Option<String>,
    /// Sign-in name.
    pub preferred_username: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a compact JWT.
    pub fn decode(jwt: &str) -> Option<Self> {
        let payload = jwt.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

// ---------------------------------------------------------------------------
// PKCE helpers
// ---------------------------------------------------------------------------

/// Generate a PKCE code verifier (random 32 bytes, base64url encoded).
///
/// # Errors
///
/// Returns an error if the system CSPRNG fails.
pub fn generate_pkce_verifier() -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rng.fill(&mut bytes).map_err(|_| AuthError::FlowFailed {
        reason: "failed to generate PKCE verifier: CSPRNG error".to_string(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Derive the PKCE code challenge from a code verifier using SHA-256.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

// ---------------------------------------------------------------------------
// OAuth flow
// ---------------------------------------------------------------------------

/// Issues grants against the token endpoint of one authority.
///
/// Stateless apart from the HTTP client; every grant takes its inputs as
/// parameters.
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthFlow {
    /// Create a new flow with the given configuration.
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build the authorization URL the user should visit.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UrlParse`] if the authority host is not a valid
    /// URL.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String> {
        let mut url = Url::parse(&self.config.authority.authorize_url())?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("response_mode", "query");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.config.redirect_uri);
            params.append_pair("state", state);
            params.append_pair("code_challenge", code_challenge);
            params.append_pair("code_challenge_method", "S256");

            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &self.config.scopes.join(" "));
            }
        }

        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::GrantRejected`] if the server rejects the code,
    /// or [`AuthError::Network`] on transport failure.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<OAuthTokens> {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
            ("scope", scope.as_str()),
        ];

        tracing::debug!(tenant = %self.config.authority.tenant, "exchanging authorization code");
        self.post_token(&params).await
    }

    /// Redeem a refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::GrantRejected`] if the refresh token is invalid,
    /// expired, or revoked.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
        ];

        tracing::debug!(tenant = %self.config.authority.tenant, "redeeming refresh token");
        self.post_token(&params).await
    }

    /// Client-credentials grant for a confidential client.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::GrantRejected`] if the secret or client id is
    /// not accepted.
    pub async fn client_credentials(&self, client_secret: &str) -> Result<OAuthTokens> {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", client_secret),
            ("scope", scope.as_str()),
        ];

        tracing::debug!(tenant = %self.config.authority.tenant, "requesting client credentials token");
        self.post_token(&params).await
    }

    /// Check whether the given tokens are expired.
    ///
    /// Returns `true` if the tokens have an `expires_at` timestamp that is
    /// in the past or within [`EXPIRY_SKEW_SECS`] of now.
    pub fn is_expired(tokens: &OAuthTokens) -> bool {
        match tokens.expires_at {
            Some(expires_at) => is_expired_at(expires_at),
            None => false,
        }
    }

    async fn post_token(&self, params: &[(&str, &str)]) -> Result<OAuthTokens> {
        let response = self
            .client
            .post(self.config.authority.token_url())
            .form(params)
            .send()
            .await?;

        parse_token_response(response).await
    }
}

/// Whether a unix timestamp is past, allowing for [`EXPIRY_SKEW_SECS`].
pub fn is_expired_at(expires_at: i64) -> bool {
    chrono::Utc::now().timestamp() >= expires_at - EXPIRY_SKEW_SECS
}

/// Parse the HTTP response from the token endpoint.
pub(crate) async fn parse_token_response(response: reqwest::Response) -> Result<OAuthTokens> {
    let status = response.status();

    if status.is_success() {
        let token_response: TokenResponse = response.json().await?;
        tracing::debug!("token grant successful");
        Ok(token_response.into_tokens())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(AuthError::GrantRejected {
            detail: grant_error_detail(status, &body),
        })
    }
}

/// Prefer the server's `error_description`, then `error`, then the raw body.
fn grant_error_detail(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(error_response) => error_response
            .error_description
            .unwrap_or(error_response.error),
        Err(_) => format!("HTTP {status}: {body}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "test-client-id".to_string(),
            authority: Authority::new("contoso.onmicrosoft.com"),
            redirect_uri: "http://localhost:8400".to_string(),
            scopes: vec![
                "https://api.powerplatform.com/.default".to_string(),
                "offline_access".to_string(),
            ],
        }
    }

    fn tokens_expiring_at(expires_at: Option<i64>) -> OAuthTokens {
        OAuthTokens {
            access_token: "tok".to_string(),
            refresh_token: None,
            id_token: None,
            expires_at,
            token_type: "Bearer".to_string(),
            scopes: vec![],
        }
    }

    #[test]
    fn authority_endpoints() {
        let authority = Authority::new("tenant-1");
        assert_eq!(
            authority.token_url(),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/token"
        );
        assert_eq!(
            authority.authorize_url(),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/authorize"
        );
        assert_eq!(
            authority.device_code_url(),
            "https://login.microsoftonline.com/tenant-1/oauth2/v2.0/devicecode"
        );
    }

    #[test]
    fn authority_host_trailing_slash_is_ignored() {
        let authority = Authority {
            host: "https://login.microsoftonline.us/".to_string(),
            tenant: "t".to_string(),
        };
        assert_eq!(
            authority.token_url(),
            "https://login.microsoftonline.us/t/oauth2/v2.0/token"
        );
    }

    #[test]
    fn pkce_verifier_is_correct_length() {
        let verifier = generate_pkce_verifier().unwrap();
        // 32 bytes base64url encoded = 43 characters (no padding).
        assert_eq!(verifier.len(), 43);
    }

    #[test]
    fn pkce_challenge_is_base64url_sha256() {
        // RFC 7636 Appendix B test vector.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = pkce_challenge(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn authorization_url_includes_all_params() {
        let flow = OAuthFlow::new(test_config());
        let challenge = pkce_challenge("test-verifier");
        let url_str = flow.authorization_url("random-state", &challenge).unwrap();

        let url = Url::parse(&url_str).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().collect();

        assert_eq!(url.path(), "/contoso.onmicrosoft.com/oauth2/v2.0/authorize");
        assert_eq!(params.get("response_type").unwrap(), "code");
        assert_eq!(params.get("client_id").unwrap(), "test-client-id");
        assert_eq!(params.get("redirect_uri").unwrap(), "http://localhost:8400");
        assert_eq!(params.get("state").unwrap(), "random-state");
        assert_eq!(params.get("code_challenge").unwrap(), challenge.as_str());
        assert_eq!(params.get("code_challenge_method").unwrap(), "S256");
        assert_eq!(
            params.get("scope").unwrap(),
            "https://api.powerplatform.com/.default offline_access"
        );
    }

    #[test]
    fn token_response_parsing() {
        let json = r#"{
            "access_token": "eyJ0eXAi.access",
            "refresh_token": "0.AAAA.refresh",
            "id_token": "header.payload.sig",
            "expires_in": 3599,
            "ext_expires_in": 3599,
            "token_type": "Bearer",
            "scope": "https://api.powerplatform.com/user_impersonation"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let tokens = response.into_tokens();

        assert_eq!(tokens.access_token, "eyJ0eXAi.access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("0.AAAA.refresh"));
        assert_eq!(tokens.id_token.as_deref(), Some("header.payload.sig"));
        assert!(tokens.expires_at.is_some());
        assert_eq!(
            tokens.scopes,
            vec!["https://api.powerplatform.com/user_impersonation"]
        );
    }

    #[test]
    fn token_response_minimal() {
        let json = r#"{ "access_token": "tok_minimal" }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let tokens = response.into_tokens();

        assert_eq!(tokens.access_token, "tok_minimal");
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.expires_at.is_none());
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[test]
    fn grant_error_detail_prefers_description() {
        let body = r#"{
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        }"#;
        let detail = grant_error_detail(reqwest::StatusCode::UNAUTHORIZED, body);
        assert_eq!(detail, "AADSTS7000215: Invalid client secret provided.");
    }

    #[test]
    fn grant_error_detail_falls_back_to_error_code() {
        let detail =
            grant_error_detail(reqwest::StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#);
        assert_eq!(detail, "invalid_grant");
    }

    #[test]
    fn grant_error_detail_non_json_body() {
        let detail = grant_error_detail(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(detail, "HTTP 502 Bad Gateway: upstream down");
    }

    #[test]
    fn id_token_claims_decode() {
        let payload = URL_SAFE_NO_PAD.encode(
            r#"{"oid":"00000000-aaaa","tid":"tenant-1","preferred_username":"ada@contoso.com"}"#,
        );
        let jwt = format!("eyJhbGciOiJub25lIn0.{payload}.");
        let claims = IdTokenClaims::decode(&jwt).unwrap();
        assert_eq!(claims.oid.as_deref(), Some("00000000-aaaa"));
        assert_eq!(claims.tid.as_deref(), Some("tenant-1"));
        assert_eq!(claims.preferred_username.as_deref(), Some("ada@contoso.com"));
    }

    #[test]
    fn id_token_claims_reject_garbage() {
        assert!(IdTokenClaims::decode("not-a-jwt").is_none());
        assert!(IdTokenClaims::decode("a.%%%.c").is_none());
    }

    #[test]
    fn is_expired_cases() {
        let now = chrono::Utc::now().timestamp();
        assert!(!OAuthFlow::is_expired(&tokens_expiring_at(Some(now + 3600))));
        assert!(OAuthFlow::is_expired(&tokens_expiring_at(Some(now - 100))));
        // 30 seconds from now is within the safety margin.
        assert!(OAuthFlow::is_expired(&tokens_expiring_at(Some(now + 30))));
        assert!(!OAuthFlow::is_expired(&tokens_expiring_at(None)));
    }

    #[test]
    fn oauth_flow_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OAuthFlow>();
        assert_send_sync::<OAuthConfig>();
        assert_send_sync::<OAuthTokens>();
    }
}
