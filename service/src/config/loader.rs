use crate::config::error::{ConfigError, Result};
use config::{Config, Environment, File};
use issuevault_engine::RetryPolicy;
use issuevault_github_store::DEFAULT_API_BASE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Socket to listen on; `$XDG_RUNTIME_DIR/issuevault.sock` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Collection directory used when a request names none
    #[serde(default = "default_collection")]
    pub default_collection: String,

    /// Prefix of newly assigned issue ids
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Where collections are stored
    #[serde(default)]
    pub backend: BackendConfig,

    /// Version-race retry policy
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Mutation audit trail
    #[serde(default)]
    pub action_log: ActionLogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Fs,
    Github,
}

/// Content store selection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default)]
    pub fs: FsBackendConfig,

    #[serde(default)]
    pub github: GithubBackendConfig,
}

/// Local directory backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsBackendConfig {
    /// Directory that collection paths are resolved against
    #[serde(default = "default_fs_root")]
    pub root: PathBuf,
}

/// GitHub contents API backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubBackendConfig {
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// API base URL (GitHub Enterprise installs differ)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the access token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionLogKind {
    /// Structured `tracing` events
    #[default]
    Tracing,
    /// JSON lines appended to a file
    Jsonl,
    None,
}

/// Action log configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionLogConfig {
    #[serde(default)]
    pub sink: ActionLogKind,

    /// File for the `jsonl` sink; defaults under the user data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Payload keys to redact on top of the built-in list
    #[serde(default)]
    pub redact_keys: Vec<String>,
}

// Default value functions
fn default_collection() -> String {
    ".beads".to_string()
}
fn default_id_prefix() -> String {
    issuevault_engine::ops::DEFAULT_ID_PREFIX.to_string()
}
fn default_fs_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            default_collection: default_collection(),
            id_prefix: default_id_prefix(),
            backend: BackendConfig::default(),
            retry: RetryPolicy::default(),
            action_log: ActionLogConfig::default(),
        }
    }
}

impl Default for FsBackendConfig {
    fn default() -> Self {
        Self {
            root: default_fs_root(),
        }
    }
}

impl Default for GithubBackendConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            branch: default_branch(),
            api_base: default_api_base(),
            token_env: default_token_env(),
        }
    }
}

impl ServiceConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(crate::default_socket_path)
    }

    /// Check cross-field constraints the types cannot express.
    pub fn validate(&self) -> Result<()> {
        self.retry
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("retry: {e}")))?;

        if self.id_prefix.is_empty()
            || !self
                .id_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::ValidationError(format!(
                "id_prefix must be non-empty and alphanumeric, got {:?}",
                self.id_prefix
            )));
        }

        if self
            .default_collection
            .split('/')
            .any(|segment| segment == "..")
        {
            return Err(ConfigError::ValidationError(format!(
                "default_collection must not leave the store root: {}",
                self.default_collection
            )));
        }

        if self.backend.kind == BackendKind::Github {
            let github = &self.backend.github;
            if github.owner.trim().is_empty() {
                return Err(ConfigError::MissingField("backend.github.owner".to_string()));
            }
            if github.repo.trim().is_empty() {
                return Err(ConfigError::MissingField("backend.github.repo".to_string()));
            }
            if github.branch.trim().is_empty() {
                return Err(ConfigError::MissingField("backend.github.branch".to_string()));
            }
        }

        if self.action_log.sink == ActionLogKind::Jsonl && self.action_log.resolved_path().is_none()
        {
            return Err(ConfigError::MissingField("action_log.path".to_string()));
        }

        Ok(())
    }
}

impl ActionLogConfig {
    /// Path for the `jsonl` sink.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            dirs::data_local_dir().map(|dir| dir.join("issuevault").join("actions.jsonl"))
        })
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (ISSUEVAULT_ prefix)
    pub fn load(&self) -> Result<ServiceConfig> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&ServiceConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Example: ISSUEVAULT_BACKEND__GITHUB__OWNER=acme
        builder = builder.add_source(
            Environment::with_prefix("ISSUEVAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("action_log.redact_keys"),
        );

        let config = builder.build()?;
        let service_config: ServiceConfig = config.try_deserialize()?;
        service_config.validate()?;

        tracing::debug!(
            file = ?self.config_path,
            backend = ?service_config.backend.kind,
            "configuration loaded"
        );
        Ok(service_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./issuevault.toml
    /// 2. XDG config: ~/.config/issuevault/config.toml
    /// 3. Home directory: ~/.issuevault.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./issuevault.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("issuevault").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".issuevault.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<ServiceConfig> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("issuevault.toml");
        std::fs::write(&path, contents).expect("Failed to write temp file");
        path
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.default_collection, ".beads");
        assert_eq!(config.id_prefix, "bd");
        assert_eq!(config.backend.kind, BackendKind::Fs);
        assert_eq!(config.backend.github.api_base, "https://api.github.com");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.action_log.sink, ActionLogKind::Tracing);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_with_defaults_only() {
        let config = ConfigLoader::new()
            .load()
            .expect("Failed to load default config");
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_with_toml_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            &temp_dir,
            r#"
default_collection = "tracker"
id_prefix = "iv"

[backend]
kind = "github"

[backend.github]
owner = "acme"
repo = "tracker"

[retry]
max_retries = 5

[action_log]
redact_keys = ["session", "cookie"]
"#,
        );

        let config = ConfigLoader::new()
            .with_file(&path)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.default_collection, "tracker");
        assert_eq!(config.id_prefix, "iv");
        assert_eq!(config.backend.kind, BackendKind::Github);
        assert_eq!(config.backend.github.owner, "acme");
        assert_eq!(config.backend.github.branch, "main");
        assert_eq!(config.retry.max_retries, 5);
        // Untouched retry keys keep their defaults.
        assert_eq!(config.retry.base_delay_ms, 100);
        assert_eq!(config.action_log.redact_keys, vec!["session", "cookie"]);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            &temp_dir,
            r#"
default_collection = "tracker"

[retry]
max_retries = 5
base_delay_ms = 50
"#,
        );

        unsafe {
            env::set_var("ISSUEVAULT_RETRY__MAX_RETRIES", "1");
            env::set_var("ISSUEVAULT_ACTION_LOG__SINK", "none");
        }

        let result = ConfigLoader::new().with_file(&path).load();

        unsafe {
            env::remove_var("ISSUEVAULT_RETRY__MAX_RETRIES");
            env::remove_var("ISSUEVAULT_ACTION_LOG__SINK");
        }

        let config = result.expect("Failed to load config");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.default_collection, "tracker");
        assert_eq!(config.action_log.sink, ActionLogKind::None);
    }

    #[test]
    #[serial]
    fn test_github_backend_requires_repo() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            &temp_dir,
            r#"
[backend]
kind = "github"

[backend.github]
owner = "acme"
"#,
        );

        let err = ConfigLoader::new().with_file(&path).load().unwrap_err();
        assert!(
            matches!(&err, ConfigError::MissingField(field) if field == "backend.github.repo"),
            "{err}"
        );
    }

    #[test]
    #[serial]
    fn test_flat_backoff_is_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = write_config(
            &temp_dir,
            r#"
[retry]
backoff_multiplier = 1.0
"#,
        );

        let err = ConfigLoader::new().with_file(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)), "{err}");
    }

    #[test]
    fn test_bad_id_prefix_is_rejected() {
        let config = ServiceConfig {
            id_prefix: "bd-".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/issuevault.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
