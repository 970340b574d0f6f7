//! Turns a [`ServiceConfig`] into a ready [`IssueEngine`].

use std::sync::Arc;

use issuevault_engine::{
    ActionLogSink, ContentStore, FsStore, IssueEngine, JsonlFileSink, NoopSink, TracingSink,
};
use issuevault_github_store::{GithubLocation, GithubStore};

use crate::config::{
    ActionLogConfig, ActionLogKind, BackendConfig, BackendKind, ConfigError, Result,
    ServiceConfig,
};

/// The configured action log. The JSONL writer is kept separately so it
/// can be flushed on shutdown.
pub struct ActionLog {
    pub sink: Arc<dyn ActionLogSink>,
    pub file: Option<Arc<JsonlFileSink>>,
}

/// Must be called inside a tokio runtime when the sink is `jsonl`.
pub fn open_action_log(config: &ActionLogConfig) -> Result<ActionLog> {
    Ok(match config.sink {
        ActionLogKind::Tracing => ActionLog {
            sink: Arc::new(TracingSink),
            file: None,
        },
        ActionLogKind::None => ActionLog {
            sink: Arc::new(NoopSink),
            file: None,
        },
        ActionLogKind::Jsonl => {
            let path = config
                .resolved_path()
                .ok_or_else(|| ConfigError::MissingField("action_log.path".to_string()))?;
            tracing::info!("Action log at {}", path.display());
            let file = Arc::new(JsonlFileSink::spawn(path));
            ActionLog {
                sink: file.clone(),
                file: Some(file),
            }
        }
    })
}

pub fn open_store(config: &BackendConfig) -> Result<Arc<dyn ContentStore>> {
    match config.kind {
        BackendKind::Fs => {
            tracing::info!("Filesystem store at {}", config.fs.root.display());
            Ok(Arc::new(FsStore::new(config.fs.root.clone())))
        }
        BackendKind::Github => {
            let github = &config.github;
            let token = std::env::var(&github.token_env).ok();
            if token.is_none() {
                tracing::warn!(
                    "{} is not set; GitHub requests will be unauthenticated",
                    github.token_env
                );
            }
            let store = GithubStore::new(
                GithubLocation {
                    owner: github.owner.clone(),
                    repo: github.repo.clone(),
                    branch: github.branch.clone(),
                },
                &github.api_base,
                token.as_deref(),
            )
            .map_err(|e| ConfigError::BackendError(e.to_string()))?;
            tracing::info!(
                "GitHub store at {}/{}@{}",
                github.owner,
                github.repo,
                github.branch
            );
            Ok(Arc::new(store))
        }
    }
}

/// Short human-readable description of the backend.
pub fn describe(config: &BackendConfig) -> String {
    match config.kind {
        BackendKind::Fs => format!("fs:{}", config.fs.root.display()),
        BackendKind::Github => format!(
            "github:{}/{}@{}",
            config.github.owner, config.github.repo, config.github.branch
        ),
    }
}

pub fn build_engine(config: &ServiceConfig, action_log: Arc<dyn ActionLogSink>) -> Result<IssueEngine> {
    let store = open_store(&config.backend)?;
    Ok(IssueEngine::new(store)
        .with_retry_policy(config.retry.clone())
        .with_action_log(action_log)
        .with_redacted_keys(&config.action_log.redact_keys)
        .with_id_prefix(config.id_prefix.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FsBackendConfig, GithubBackendConfig};
    use pretty_assertions::assert_eq;

    #[test]
    fn describes_backends() {
        let fs = BackendConfig {
            kind: BackendKind::Fs,
            fs: FsBackendConfig {
                root: "/srv/issues".into(),
            },
            ..Default::default()
        };
        assert_eq!(describe(&fs), "fs:/srv/issues");

        let github = BackendConfig {
            kind: BackendKind::Github,
            github: GithubBackendConfig {
                owner: "acme".to_string(),
                repo: "tracker".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(describe(&github), "github:acme/tracker@main");
    }

    #[test]
    fn rejects_unusable_api_base() {
        let config = BackendConfig {
            kind: BackendKind::Github,
            github: GithubBackendConfig {
                owner: "acme".to_string(),
                repo: "tracker".to_string(),
                api_base: "not a url".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            open_store(&config),
            Err(ConfigError::BackendError(_))
        ));
    }

    #[test]
    fn engine_takes_configured_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            id_prefix: "iv".to_string(),
            backend: BackendConfig {
                fs: FsBackendConfig {
                    root: dir.path().to_path_buf(),
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let engine = build_engine(&config, Arc::new(NoopSink)).unwrap();
        assert_eq!(engine.id_prefix(), "iv");
        assert_eq!(engine.retry_policy(), &config.retry);
    }
}
