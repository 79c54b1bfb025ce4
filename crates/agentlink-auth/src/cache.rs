//! Serializable cache of interactive sign-in state.
//!
//! One [`TokenCache`] describes every account the interactive strategy has
//! signed in: its refresh token and the access tokens issued per scope set.
//! The whole cache serializes to a single JSON document, which is what
//! [`TokenStore`](crate::store::TokenStore) persists.
//!
//! Every mutation raises a change flag that is not serialized; callers
//! persist only when [`TokenCache::has_state_changed`] is `true`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::oauth::{IdTokenClaims, OAuthTokens, is_expired_at};

/// Current on-disk format version.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Scopes the identity platform adds to every interactive grant. They never
/// identify the resource, so they are left out of cache keys.
const RESERVED_SCOPES: &[&str] = &["offline_access", "openid", "profile"];

fn default_version() -> u32 {
    CACHE_FORMAT_VERSION
}

/// An access token cached for one scope set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccessToken {
    /// Normalized scope key (see [`scope_key`]).
    pub scopes: Vec<String>,
    /// The bearer token.
    pub secret: String,
    /// Unix timestamp (seconds) when the token expires.
    pub expires_at: Option<i64>,
}

impl CachedAccessToken {
    /// Whether the token is past (or within the skew of) its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(is_expired_at)
    }
}

/// An account known to the interactive strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccount {
    /// `<oid>.<tid>` from the id token.
    pub home_account_id: String,
    /// Sign-in name, when the id token carried one.
    pub username: Option<String>,
    /// Tenant the account was signed in through, as configured.
    pub authority_tenant: String,
    /// Application the tokens were issued to.
    pub client_id: String,
    /// Refresh token used for silent renewal.
    pub refresh_token: Option<String>,
    /// Access tokens by scope set.
    #[serde(default)]
    pub access_tokens: Vec<CachedAccessToken>,
}

/// The persisted credential cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    accounts: BTreeMap<String, CachedAccount>,
    #[serde(skip)]
    state_changed: bool,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            accounts: BTreeMap::new(),
            state_changed: false,
        }
    }
}

/// Lowercase, sort, and drop reserved scopes so equal requests share a key.
pub fn scope_key(scopes: &[String]) -> Vec<String> {
    let mut key: Vec<String> = scopes
        .iter()
        .map(|s| s.to_ascii_lowercase())
        .filter(|s| !RESERVED_SCOPES.contains(&s.as_str()))
        .collect();
    key.sort();
    key.dedup();
    key
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a serialized cache. The change flag starts cleared.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Serialization`](crate::AuthError::Serialization)
    /// if the document is not a valid cache.
    pub fn deserialize(data: &str) -> Result<Self> {
        let cache: TokenCache = serde_json::from_str(data)?;
        Ok(cache)
    }

    /// Serialize the whole cache.
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether the cache was mutated since it was loaded or last persisted.
    pub fn has_state_changed(&self) -> bool {
        self.state_changed
    }

    /// Clear the change flag after a successful write.
    pub fn mark_persisted(&mut self) {
        self.state_changed = false;
    }

    /// Number of cached accounts across all applications.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the cache holds no accounts.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Accounts signed in to `client_id` through `authority_tenant`.
    pub fn accounts(&self, client_id: &str, authority_tenant: &str) -> Vec<&CachedAccount> {
        self.accounts
            .values()
            .filter(|a| {
                a.client_id == client_id && a.authority_tenant.eq_ignore_ascii_case(authority_tenant)
            })
            .collect()
    }

    /// An unexpired access token for `scopes`, if one is cached.
    pub fn valid_access_token(
        &self,
        home_account_id: &str,
        scopes: &[String],
    ) -> Option<&CachedAccessToken> {
        let key = scope_key(scopes);
        self.accounts
            .get(home_account_id)?
            .access_tokens
            .iter()
            .find(|t| t.scopes == key && !t.is_expired())
    }

    /// Record a successful grant and return the account it belongs to.
    ///
    /// The account is identified from the id token when present, otherwise
    /// `known_account` (the account a refresh was issued for) is reused.
    pub fn record_tokens(
        &mut self,
        client_id: &str,
        authority_tenant: &str,
        scopes: &[String],
        tokens: &OAuthTokens,
        known_account: Option<&str>,
    ) -> String {
        let claims = tokens
            .id_token
            .as_deref()
            .and_then(IdTokenClaims::decode)
            .unwrap_or_default();

        let home_account_id = match (&claims.oid, &claims.tid) {
            (Some(oid), Some(tid)) => format!("{oid}.{tid}"),
            _ => known_account
                .map(String::from)
                .unwrap_or_else(|| format!("{client_id}.{authority_tenant}")),
        };

        let account = self
            .accounts
            .entry(home_account_id.clone())
            .or_insert_with(|| CachedAccount {
                home_account_id: home_account_id.clone(),
                username: None,
                authority_tenant: authority_tenant.to_string(),
                client_id: client_id.to_string(),
                refresh_token: None,
                access_tokens: Vec::new(),
            });

        if claims.preferred_username.is_some() {
            account.username = claims.preferred_username;
        }
        // The platform may omit a rotated refresh token; keep the old one.
        if tokens.refresh_token.is_some() {
            account.refresh_token = tokens.refresh_token.clone();
        }

        let key = scope_key(scopes);
        account.access_tokens.retain(|t| t.scopes != key);
        account.access_tokens.push(CachedAccessToken {
            scopes: key,
            secret: tokens.access_token.clone(),
            expires_at: tokens.expires_at,
        });

        self.state_changed = true;
        home_account_id
    }

    /// Forget an account, e.g. after its refresh token was rejected.
    pub fn remove_account(&mut self, home_account_id: &str) -> bool {
        let removed = self.accounts.remove(home_account_id).is_some();
        if removed {
            self.state_changed = true;
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
