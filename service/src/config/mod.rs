/// Configuration module for the issuevault service
///
/// Layered configuration:
/// 1. Defaults (from code)
/// 2. Config file (issuevault.toml)
/// 3. Environment variables (ISSUEVAULT_* prefix)
///
/// # Example
///
/// ```no_run
/// use issuevault_service::config::ConfigLoader;
///
/// // Load from default locations
/// let config = ConfigLoader::load_default().expect("Failed to load config");
///
/// // Or load from specific file
/// let config = ConfigLoader::new()
///     .with_file("./my-config.toml")
///     .load()
///     .expect("Failed to load config");
/// ```
pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{
    ActionLogConfig, ActionLogKind, BackendConfig, BackendKind, ConfigLoader, FsBackendConfig,
    GithubBackendConfig, ServiceConfig,
};
