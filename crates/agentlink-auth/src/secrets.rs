//! Where secrets come from.
//!
//! Secrets are read from the process environment at acquisition time and
//! never from the token cache. The [`SecretSource`] seam lets tests supply
//! them without mutating the real environment.

use std::collections::HashMap;

/// Environment variable holding the passthrough secret.
pub const PASSTHROUGH_SECRET_VAR: &str = "COPILOT_STUDIO_WEB_CHANNEL_SECURITY_KEY";

/// Environment variable holding the client secret for client credentials.
pub const CLIENT_SECRET_VAR: &str = "AZURE_CLIENT_SECRET";

/// Lookup of named secrets.
pub trait SecretSource: Send + Sync {
    /// The value of `name`, or `None` when unset or empty.
    fn secret(&self, name: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl SecretSource for ProcessEnv {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_source_treats_empty_as_unset() {
        let mut map = HashMap::new();
        map.insert(CLIENT_SECRET_VAR.to_string(), String::new());
        map.insert(PASSTHROUGH_SECRET_VAR.to_string(), "s3cret".to_string());

        assert_eq!(map.secret(CLIENT_SECRET_VAR), None);
        assert_eq!(map.secret(PASSTHROUGH_SECRET_VAR).as_deref(), Some("s3cret"));
        assert_eq!(map.secret("UNSET"), None);
    }
}
