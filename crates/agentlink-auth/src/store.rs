//! File-backed persistence for the [`TokenCache`].
//!
//! The store owns exactly one file. Writes go to a temporary file in the
//! same directory which is then renamed over the target, so a concurrent
//! reader in another process sees either the old or the new cache, never a
//! torn one. On Unix the temporary file is created with mode `0600`.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::cache::TokenCache;
use crate::error::{AuthError, Result};

/// Default cache location, relative to the working directory.
pub const DEFAULT_TOKEN_CACHE_FILE: &str = ".token_cache.json";

/// Persists and reloads the serialized credential cache.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store for the given file. Nothing is touched until
    /// [`load`](Self::load) or [`persist`](Self::persist) is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cache.
    ///
    /// Returns `Ok(None)` when no cache has been written yet. A file that
    /// cannot be parsed is reported and treated as absent; the next persist
    /// replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the file exists but cannot be read.
    pub fn load(&self) -> Result<Option<TokenCache>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no token cache on disk");
                return Ok(None);
            }
            Err(e) => return Err(AuthError::Io(e)),
        };

        match TokenCache::deserialize(&data) {
            Ok(cache) => {
                tracing::info!(
                    path = %self.path.display(),
                    accounts = cache.len(),
                    "loaded token cache"
                );
                Ok(Some(cache))
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "token cache is unreadable, ignoring it"
                );
                Ok(None)
            }
        }
    }

    /// Write the cache if it changed since it was loaded.
    ///
    /// Returns whether a write happened. On success the cache's change flag
    /// is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the temporary file cannot be written or
    /// renamed into place.
    pub fn persist(&self, cache: &mut TokenCache) -> Result<bool> {
        if !cache.has_state_changed() {
            tracing::trace!("token cache unchanged, skipping write");
            return Ok(false);
        }

        let data = cache.serialize()?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AuthError::Io(e.error))?;

        cache.mark_persisted();
        tracing::info!(path = %self.path.display(), "token cache saved");
        Ok(true)
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_CACHE_FILE)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::OAuthTokens;

    fn populated_cache() -> TokenCache {
        let mut cache = TokenCache::new();
        cache.record_tokens(
            "client",
            "contoso",
            &["https://api.powerplatform.com/.default".to_string()],
            &OAuthTokens {
                access_token: "at".to_string(),
                refresh_token: Some("rt".to_string()),
                id_token: None,
                expires_at: Some(chrono::Utc::now().timestamp() + 3600),
                token_type: "Bearer".to_string(),
                scopes: vec![],
            },
            None,
        );
        cache
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("cache.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("cache.json"));

        let mut cache = populated_cache();
        assert!(store.persist(&mut cache).unwrap());
        assert!(!cache.has_state_changed());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.accounts("client", "contoso")[0].refresh_token.as_deref(), Some("rt"));
    }

    #[test]
    fn persist_skips_unchanged_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = TokenStore::new(&path);

        let mut cache = TokenCache::new();
        assert!(!store.persist(&mut cache).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn persist_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        let store = TokenStore::new(&path);

        let mut cache = populated_cache();
        store.persist(&mut cache).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = TokenStore::new(&path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn persist_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "stale").unwrap();

        let store = TokenStore::new(&path);
        let mut cache = populated_cache();
        store.persist(&mut cache).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"version\": 1"));
    }
}
