//! Shared pieces for the `foreman` and `foreman-worker` binaries: settings
//! resolved from the environment (after `env_config` layering) and logging
//! setup.

use std::path::PathBuf;
use std::sync::Arc;

use foreman::host::MockRepoHost;
use foreman::manager::parse_connected_repos;
use foreman::RepoHost;

/// Env var overriding the worker binary path (tests point it at a build
/// artifact; production resolves it next to the current executable).
pub const WORKER_EXE_ENV: &str = "FOREMAN_WORKER_EXE";
/// Env var selecting the repo-host backend for worker processes.
pub const HOST_BACKEND_ENV: &str = "FOREMAN_HOST";
/// Env var pointing the mock host at a seed directory (one subdir per repo).
pub const MOCK_HOST_DIR_ENV: &str = "FOREMAN_MOCK_HOST_DIR";

/// Process configuration shared by both binaries.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
    pub state_dir: PathBuf,
    pub connected_repos: Vec<(String, String)>,
}

impl Settings {
    /// Reads settings from the environment. Call after
    /// `env_config::load_and_apply` so `.env` and XDG values are visible.
    pub fn from_env() -> Self {
        Self {
            db_path: PathBuf::from(env_config::env_or("FOREMAN_DB", "foreman_tasks.db")),
            logs_dir: PathBuf::from(env_config::env_or("FOREMAN_LOGS_DIR", "logs")),
            state_dir: PathBuf::from(env_config::env_or("FOREMAN_STATE_DIR", ".foreman")),
            connected_repos: parse_connected_repos(&env_config::env_or("CONNECTED_REPOS", "")),
        }
    }
}

/// Resolves the repo-host backend for a worker process.
///
/// `mock` (the default) builds an in-memory host, seeded from
/// `FOREMAN_MOCK_HOST_DIR` when set. A production host client is an external
/// integration injected by the embedding application; naming any other
/// backend here is an error rather than a silent fallback.
pub fn resolve_host() -> Result<Arc<dyn RepoHost>, String> {
    let backend = env_config::env_or(HOST_BACKEND_ENV, "mock");
    match backend.as_str() {
        "mock" => {
            let host = match std::env::var(MOCK_HOST_DIR_ENV) {
                Ok(dir) => {
                    let owner = Settings::from_env()
                        .connected_repos
                        .first()
                        .map(|(owner, _)| owner.clone())
                        .unwrap_or_else(|| "local".to_string());
                    MockRepoHost::from_dir(&owner, std::path::Path::new(&dir))
                        .map_err(|e| format!("seed mock host from {dir}: {e}"))?
                }
                Err(_) => MockRepoHost::new(),
            };
            Ok(Arc::new(host))
        }
        other => Err(format!(
            "unsupported host backend '{other}'; embed a RepoHost implementation \
             through the library API instead"
        )),
    }
}

/// Installs the tracing subscriber shared by both binaries.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: settings fall back to defaults when the env is empty.
    #[test]
    fn settings_defaults() {
        std::env::remove_var("FOREMAN_DB");
        std::env::remove_var("CONNECTED_REPOS");
        let settings = Settings::from_env();
        assert_eq!(settings.db_path, PathBuf::from("foreman_tasks.db"));
        assert!(settings.connected_repos.is_empty());
    }

    /// **Scenario**: an unknown host backend is rejected, not silently mocked.
    #[test]
    fn unknown_host_backend_rejected() {
        std::env::set_var(HOST_BACKEND_ENV, "github");
        let err = resolve_host().unwrap_err();
        assert!(err.contains("github"));
        std::env::remove_var(HOST_BACKEND_ENV);
    }
}
