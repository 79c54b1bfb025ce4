//! Configuration loading.
//!
//! Settings come from an optional `agentlink.toml` (an explicit path, or the
//! first one found in the working directory and up to two parents), then
//! environment variables override individual keys. Secrets are never read
//! from the file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentlink_auth::store::DEFAULT_TOKEN_CACHE_FILE;
use agentlink_auth::{
    AuthMode, AuthSettings, CLIENT_SECRET_VAR, DEFAULT_CALLBACK_PORT, DEFAULT_SCOPE,
    InteractiveFlow, PASSTHROUGH_SECRET_VAR, SecretSource, TokenStore,
};
use serde::{Deserialize, Serialize};

use crate::copilot::{ConnectionSettings, PowerPlatformCloud};
use crate::error::ConfigError;
use crate::log::DEFAULT_LOGS_DIR;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "agentlink.toml";

/// Directories searched: the start directory and two parents.
const SEARCH_DEPTH: usize = 3;

pub const ENV_ENVIRONMENT_ID: &str = "COPILOT_STUDIO_AGENT_ENVIRONMENT_ID";
pub const ENV_TENANT_ID: &str = "COPILOT_STUDIO_AGENT_TENANT_ID";
pub const ENV_APP_ID: &str = "COPILOT_STUDIO_AGENT_APP_ID";
pub const ENV_SCHEMA_NAME: &str = "COPILOT_STUDIO_AGENT_AGENT_IDENTIFIER";
pub const ENV_AGENT_NAME: &str = "COPILOT_STUDIO_AGENT_NAME";
pub const ENV_AUTH_MODE: &str = "COPILOT_STUDIO_AGENT_AUTH_MODE";
pub const ENV_CLIENT_ID: &str = "COPILOT_STUDIO_AGENT_APP_CLIENT_ID";
pub const ENV_INTERACTIVE_FLOW: &str = "COPILOT_STUDIO_AGENT_INTERACTIVE_FLOW";
pub const ENV_CLOUD: &str = "POWER_PLATFORM_CLOUD";
pub const ENV_TIMEOUT: &str = "COPILOT_STUDIO_API_TIMEOUT";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `[agent]`: which agent to talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub environment_id: String,
    pub tenant_id: String,
    pub app_id: String,
    /// Agent schema name (the agent identifier).
    pub schema_name: String,
    pub name: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            environment_id: String::new(),
            tenant_id: String::new(),
            app_id: String::new(),
            schema_name: String::new(),
            name: "Copilot Agent".to_string(),
        }
    }
}

/// `[auth]`: how credentials are obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub mode: String,
    pub client_id: String,
    /// `browser` or `device_code`.
    pub interactive: String,
    pub scope: String,
    pub token_cache_file: PathBuf,
    pub callback_port: u16,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            mode: AuthMode::InteractiveCached.as_str().to_string(),
            client_id: String::new(),
            interactive: "browser".to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            token_cache_file: PathBuf::from(DEFAULT_TOKEN_CACHE_FILE),
            callback_port: DEFAULT_CALLBACK_PORT,
        }
    }
}

/// `[api]`: where the agent is hosted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub cloud: String,
    /// Connect timeout and longest silence tolerated mid-stream. Turns
    /// that keep streaming have no overall deadline.
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            cloud: PowerPlatformCloud::Prod.as_str().to_string(),
            timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentLinkConfig
// ---------------------------------------------------------------------------

/// Complete configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLinkConfig {
    pub agent: AgentSection,
    pub auth: AuthSection,
    pub api: ApiSection,
    pub logs_dir: PathBuf,
    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
    /// Environment overrides that could not be applied.
    #[serde(skip)]
    env_problems: Vec<String>,
}

impl Default for AgentLinkConfig {
    fn default() -> Self {
        Self {
            agent: AgentSection::default(),
            auth: AuthSection::default(),
            api: ApiSection::default(),
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
            source: None,
            env_problems: Vec::new(),
        }
    }
}

impl AgentLinkConfig {
    /// Load from `explicit` or the discovered file, then apply `env`.
    pub fn load(explicit: Option<&Path>, env: &dyn SecretSource) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Read {
            path: ".".to_string(),
            source,
        })?;
        Self::load_from(explicit, &cwd, env)
    }

    /// Like [`load`](Self::load), searching from `start` instead of the
    /// working directory.
    pub fn load_from(
        explicit: Option<&Path>,
        start: &Path,
        env: &dyn SecretSource,
    ) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => discover(start),
        };

        let mut config = match path {
            Some(path) => {
                let config = Self::from_file(&path)?;
                tracing::debug!(path = %path.display(), "configuration file loaded");
                config
            }
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(env);
        Ok(config)
    }

    /// Parse one TOML file without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Overwrite keys that have a non-empty environment variable.
    pub fn apply_env(&mut self, env: &dyn SecretSource) {
        let strings: [(&str, &mut String); 9] = [
            (ENV_ENVIRONMENT_ID, &mut self.agent.environment_id),
            (ENV_TENANT_ID, &mut self.agent.tenant_id),
            (ENV_APP_ID, &mut self.agent.app_id),
            (ENV_SCHEMA_NAME, &mut self.agent.schema_name),
            (ENV_AGENT_NAME, &mut self.agent.name),
            (ENV_AUTH_MODE, &mut self.auth.mode),
            (ENV_CLIENT_ID, &mut self.auth.client_id),
            (ENV_INTERACTIVE_FLOW, &mut self.auth.interactive),
            (ENV_CLOUD, &mut self.api.cloud),
        ];
        for (var, slot) in strings {
            if let Some(value) = env.secret(var) {
                *slot = value;
            }
        }

        if let Some(raw) = env.secret(ENV_TIMEOUT) {
            match raw.trim().parse() {
                Ok(secs) => self.api.timeout_secs = secs,
                Err(_) => self
                    .env_problems
                    .push(format!("{ENV_TIMEOUT} must be a whole number of seconds, got '{raw}'")),
            }
        }
    }

    /// Check every setting and report all problems together.
    pub fn validate(&self, env: &dyn SecretSource) -> Result<(), ConfigError> {
        let mut problems = self.env_problems.clone();

        let required = [
            ("agent.environment_id", ENV_ENVIRONMENT_ID, &self.agent.environment_id),
            ("agent.tenant_id", ENV_TENANT_ID, &self.agent.tenant_id),
            ("agent.schema_name", ENV_SCHEMA_NAME, &self.agent.schema_name),
        ];
        for (key, var, value) in required {
            if value.trim().is_empty() {
                problems.push(format!("{key} is required (set it in {CONFIG_FILE_NAME} or {var})"));
            }
        }

        match self.auth.mode.parse::<AuthMode>() {
            Ok(mode) => {
                if mode.requires_client_id() && self.auth.client_id.trim().is_empty() {
                    problems.push(format!(
                        "auth.client_id is required for auth mode '{mode}' (set it in {CONFIG_FILE_NAME} or {ENV_CLIENT_ID})"
                    ));
                }
                match mode {
                    AuthMode::PassthroughSecret if env.secret(PASSTHROUGH_SECRET_VAR).is_none() => {
                        problems.push(format!("{PASSTHROUGH_SECRET_VAR} must be set for auth mode '{mode}'"));
                    }
                    AuthMode::ClientCredentials if env.secret(CLIENT_SECRET_VAR).is_none() => {
                        problems.push(format!("{CLIENT_SECRET_VAR} must be set for auth mode '{mode}'"));
                    }
                    _ => {}
                }
            }
            Err(e) => problems.push(e.to_string()),
        }

        if let Err(e) = self.auth.interactive.parse::<InteractiveFlow>() {
            problems.push(e.to_string());
        }
        if let Err(e) = self.api.cloud.parse::<PowerPlatformCloud>() {
            problems.push(e);
        }
        if self.api.timeout_secs == 0 {
            problems.push("api.timeout_secs must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    /// Settings for the token acquisition manager.
    pub fn auth_settings(&self) -> Result<AuthSettings, ConfigError> {
        let mode: AuthMode = self.auth.mode.parse().map_err(invalid)?;
        let client_id = Some(self.auth.client_id.trim().to_string()).filter(|id| !id.is_empty());
        let mut settings = AuthSettings::new(mode, self.agent.tenant_id.trim(), client_id);
        settings.interactive = self.auth.interactive.parse().map_err(invalid)?;
        settings.scopes = vec![self.auth.scope.clone()];
        settings.callback_port = self.auth.callback_port;
        Ok(settings)
    }

    /// Settings for the Copilot Studio transport.
    pub fn connection_settings(&self) -> Result<ConnectionSettings, ConfigError> {
        let cloud = self
            .api
            .cloud
            .parse()
            .map_err(|problem| ConfigError::Invalid { problems: vec![problem] })?;
        Ok(ConnectionSettings {
            environment_id: self.agent.environment_id.trim().to_string(),
            schema_name: self.agent.schema_name.trim().to_string(),
            cloud,
            idle_timeout: Duration::from_secs(self.api.timeout_secs),
        })
    }

    pub fn token_store(&self) -> TokenStore {
        TokenStore::new(self.auth.token_cache_file.clone())
    }

    /// The client id with all but its last eight characters hidden.
    pub fn masked_client_id(&self) -> String {
        mask(&self.auth.client_id)
    }

    /// Human-readable summary with identifiers masked.
    pub fn display(&self) -> String {
        let source = self
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none, defaults and environment only)".to_string());

        let rows = [
            ("Config file", source),
            ("Agent", self.agent.name.clone()),
            ("Environment ID", or_unset(&self.agent.environment_id)),
            ("Tenant ID", or_unset(&self.agent.tenant_id)),
            ("Schema name", or_unset(&self.agent.schema_name)),
            ("App ID", or_unset(&self.agent.app_id)),
            ("Auth mode", self.auth.mode.clone()),
            ("Client ID", self.masked_client_id()),
            ("Interactive flow", self.auth.interactive.clone()),
            ("Token cache", self.auth.token_cache_file.display().to_string()),
            ("Cloud", self.api.cloud.clone()),
            ("Idle timeout", format!("{}s", self.api.timeout_secs)),
            ("Logs", self.logs_dir.display().to_string()),
        ];

        let mut out = String::new();
        for (label, value) in rows {
            let _ = writeln!(out, "{:<18}{value}", format!("{label}:"));
        }
        out
    }
}

fn discover(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(SEARCH_DEPTH)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

fn invalid(e: agentlink_auth::AuthError) -> ConfigError {
    ConfigError::Invalid {
        problems: vec![e.to_string()],
    }
}

fn or_unset(value: &str) -> String {
    if value.is_empty() {
        "(not set)".to_string()
    } else {
        value.to_string()
    }
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => "(not set)".to_string(),
        n if n <= 8 => "***".to_string(),
        n => format!("***{}", chars[n - 8..].iter().collect::<String>()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn complete_env() -> HashMap<String, String> {
        env(&[
            (ENV_ENVIRONMENT_ID, "abcd-1234"),
            (ENV_TENANT_ID, "tenant"),
            (ENV_SCHEMA_NAME, "cr123_helpdesk"),
            (ENV_CLIENT_ID, "00000000-1111-2222-3333-444455556666"),
        ])
    }

    #[test]
    fn defaults() {
        let config = AgentLinkConfig::default();
        assert_eq!(config.agent.name, "Copilot Agent");
        assert_eq!(config.auth.mode, "interactive-cached");
        assert_eq!(config.api.cloud, "prod");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.logs_dir, PathBuf::from("logs"));
        assert_eq!(config.auth.token_cache_file, PathBuf::from(".token_cache.json"));
    }

    #[test]
    fn file_is_discovered_in_parent_and_env_wins() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(
            root.path().join(CONFIG_FILE_NAME),
            r#"
logs_dir = "var/logs"

[agent]
environment_id = "from-file"
tenant_id = "file-tenant"
schema_name = "cr_file"

[api]
cloud = "gov"
timeout_secs = 90
"#,
        )
        .unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let vars = env(&[(ENV_ENVIRONMENT_ID, "from-env"), (ENV_TIMEOUT, "45")]);
        let config = AgentLinkConfig::load_from(None, &nested, &vars).unwrap();

        assert_eq!(config.source.as_deref(), Some(root.path().join(CONFIG_FILE_NAME).as_path()));
        assert_eq!(config.agent.environment_id, "from-env");
        assert_eq!(config.agent.tenant_id, "file-tenant");
        assert_eq!(config.api.cloud, "gov");
        assert_eq!(config.api.timeout_secs, 45);
        assert_eq!(config.logs_dir, PathBuf::from("var/logs"));
        assert_eq!(config.agent.name, "Copilot Agent");
    }

    #[test]
    fn search_stops_after_two_parents() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join(CONFIG_FILE_NAME), "[agent]\ntenant_id = \"t\"\n").unwrap();
        let deep = root.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&deep).unwrap();

        let config = AgentLinkConfig::load_from(None, &deep, &HashMap::new()).unwrap();
        assert!(config.source.is_none());
        assert!(config.agent.tenant_id.is_empty());
    }

    #[test]
    fn explicit_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = AgentLinkConfig::load_from(Some(&missing), dir.path(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[agent\n").unwrap();
        let err = AgentLinkConfig::load_from(Some(&path), dir.path(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn validate_reports_every_problem() {
        let vars = env(&[(ENV_AUTH_MODE, "client_credentials"), (ENV_CLOUD, "mars"), (ENV_TIMEOUT, "soon")]);
        let mut config = AgentLinkConfig::default();
        config.apply_env(&vars);

        let Err(ConfigError::Invalid { problems }) = config.validate(&vars) else {
            panic!("expected invalid configuration");
        };
        let joined = problems.join("\n");
        for needle in [
            ENV_TIMEOUT,
            "agent.environment_id",
            "agent.tenant_id",
            "agent.schema_name",
            "auth.client_id",
            CLIENT_SECRET_VAR,
            "unknown Power Platform cloud",
        ] {
            assert!(joined.contains(needle), "missing '{needle}' in:\n{joined}");
        }
    }

    #[test]
    fn passthrough_needs_secret_but_not_client_id() {
        let mut vars = complete_env();
        vars.remove(ENV_CLIENT_ID);
        vars.insert(ENV_AUTH_MODE.to_string(), "directline".to_string());
        let mut config = AgentLinkConfig::default();
        config.apply_env(&vars);

        let Err(ConfigError::Invalid { problems }) = config.validate(&vars) else {
            panic!("expected invalid configuration");
        };
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains(PASSTHROUGH_SECRET_VAR));

        vars.insert(PASSTHROUGH_SECRET_VAR.to_string(), "key".to_string());
        assert!(config.validate(&vars).is_ok());
    }

    #[test]
    fn settings_are_derived() {
        let mut vars = complete_env();
        vars.insert(ENV_INTERACTIVE_FLOW.to_string(), "device_code".to_string());
        let mut config = AgentLinkConfig::default();
        config.apply_env(&vars);
        config.validate(&vars).unwrap();

        let auth = config.auth_settings().unwrap();
        assert_eq!(auth.mode, AuthMode::InteractiveCached);
        assert_eq!(auth.interactive, InteractiveFlow::DeviceCode);
        assert_eq!(auth.tenant_id, "tenant");
        assert_eq!(auth.scopes, vec![DEFAULT_SCOPE.to_string()]);

        let connection = config.connection_settings().unwrap();
        assert_eq!(connection.cloud, PowerPlatformCloud::Prod);
        assert_eq!(connection.idle_timeout, Duration::from_secs(30));
        assert_eq!(
            connection.environment_host().unwrap(),
            "abcd12.34.environment.api.powerplatform.com"
        );
    }

    #[test]
    fn display_masks_client_id() {
        let mut config = AgentLinkConfig::default();
        config.apply_env(&complete_env());
        let text = config.display();
        assert!(text.contains("***55556666"));
        assert!(!text.contains("00000000-1111"));
        assert!(text.contains("App ID:           (not set)"));
    }

    #[test]
    fn mask_short_values() {
        assert_eq!(mask(""), "(not set)");
        assert_eq!(mask("12345678"), "***");
        assert_eq!(mask("123456789"), "***23456789");
    }
}
