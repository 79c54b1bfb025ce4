//! Error types for the auth crate.
//!
//! All credential operations surface errors through [`AuthError`]. The
//! first three variants are the ones a session treats as fatal and shows
//! to the caller verbatim; the rest describe failures inside a flow and are
//! usually wrapped into one of them by the strategy that ran the flow.

/// Unified error type for credential acquisition.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A secret the selected mode depends on is not set in the environment.
    #[error("missing secret: environment variable {variable} is not set")]
    MissingSecret {
        /// Name of the environment variable that was consulted.
        variable: String,
    },

    /// The token endpoint refused a grant (client credentials, refresh, or
    /// authorization code exchange).
    #[error("grant rejected: {detail}")]
    GrantRejected {
        /// Error description returned by the token endpoint.
        detail: String,
    },

    /// Interactive sign-in failed, was denied, or expired.
    #[error("interactive authentication failed: {detail}")]
    InteractiveAuthFailed {
        /// Why the sign-in did not complete.
        detail: String,
    },

    /// The user did not finish signing in before the flow expired.
    #[error("sign-in timed out after {timeout_secs} seconds")]
    SignInTimeout {
        /// How many seconds we waited before giving up.
        timeout_secs: u64,
    },

    /// A step of a flow failed for a non-specific reason.
    #[error("authentication flow failed: {reason}")]
    FlowFailed {
        /// Details about why the flow failed.
        reason: String,
    },

    /// Settings are missing or inconsistent for the selected mode.
    #[error("invalid auth configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// An HTTP request to the identity provider failed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (token cache file, callback listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl AuthError {
    /// Wrap any flow error into [`AuthError::InteractiveAuthFailed`],
    /// leaving errors that already are one untouched.
    pub fn into_interactive(self) -> Self {
        match self {
            err @ AuthError::InteractiveAuthFailed { .. } => err,
            other => AuthError::InteractiveAuthFailed {
                detail: other.to_string(),
            },
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
