//! Load configuration from XDG `config.toml` and project `.env`, then apply to the process
//! environment with priority: **existing env > .env > XDG**.
//!
//! All foreman processes (the manager and every spawned worker) call
//! [`load_and_apply`] once at startup so that task payloads stay the only
//! behavior-driving input; everything else (database path, host credentials,
//! provider keys, connected repositories) comes from the environment.

mod dotenv;
mod xdg_toml;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Sets `key` only when the process environment does not already define it.
/// Returns whether the value was applied.
fn apply_if_unset(key: &str, value: &str) -> bool {
    if std::env::var(key).is_ok() {
        return false; // existing env wins
    }
    std::env::set_var(key, value);
    true
}

/// Loads config from XDG `config.toml` and optional project `.env`, applies
/// both to the process environment and returns how many variables were set.
///
/// Layering, strongest first: existing process env, then project `.env`
/// (current directory or `override_dir` if given), then the `[env]` table of
/// `$XDG_CONFIG_HOME/<app_name>/config.toml`. The `.env` pass runs first and
/// the XDG pass skips every key `.env` defined, so a later pass can never
/// shadow an earlier layer even if the maps disagree.
///
/// * `app_name`: e.g. `"foreman"` — used for XDG path `~/.config/<app_name>/config.toml`.
/// * `override_dir`: if `Some`, look for `.env` in this directory instead of `std::env::current_dir()`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<usize, LoadError> {
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    let xdg_map = xdg_toml::load_env_map(app_name)?;

    let mut applied = 0;
    for (key, value) in &dotenv_map {
        if apply_if_unset(key, value) {
            applied += 1;
        }
    }
    for (key, value) in &xdg_map {
        if !dotenv_map.contains_key(key) && apply_if_unset(key, value) {
            applied += 1;
        }
    }
    Ok(applied)
}

/// Reads an environment variable, falling back to `default` when unset or empty.
pub fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

/// Serializes tests that mutate process-wide environment (XDG_CONFIG_HOME).
#[cfg(test)]
pub(crate) fn test_env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    LOCK.get_or_init(|| std::sync::Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn restore_var(key: &str, prev: Option<String>) {
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    fn write_xdg_config(xdg_dir: &Path, key: &str, value: &str) {
        let app_dir = xdg_dir.join("foreman");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            format!("[env]\n{key} = \"{value}\"\n"),
        )
        .unwrap();
    }

    fn with_xdg_home<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let _guard = crate::test_env_lock();
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        restore_var("XDG_CONFIG_HOME", prev);
        out
    }

    #[test]
    fn existing_env_wins() {
        env::set_var("FOREMAN_CFG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("foreman", None);
        assert_eq!(
            env::var("FOREMAN_CFG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("FOREMAN_CFG_TEST_EXISTING");
    }

    #[test]
    fn load_and_apply_no_config_applies_nothing() {
        let empty = tempfile::tempdir().unwrap();
        let applied = with_xdg_home(empty.path(), || {
            load_and_apply("config-crate-nonexistent-app-xyz", Some(empty.path()))
        })
        .unwrap();
        assert_eq!(applied, 0);
    }

    #[test]
    fn dotenv_overrides_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap();
        write_xdg_config(xdg_dir.path(), "FOREMAN_CFG_TEST_PRIORITY", "from_xdg");

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "FOREMAN_CFG_TEST_PRIORITY=from_dotenv\n",
        )
        .unwrap();

        env::remove_var("FOREMAN_CFG_TEST_PRIORITY");
        let applied = with_xdg_home(xdg_dir.path(), || {
            load_and_apply("foreman", Some(dotenv_dir.path()))
        })
        .unwrap();
        let val = env::var("FOREMAN_CFG_TEST_PRIORITY").unwrap();
        env::remove_var("FOREMAN_CFG_TEST_PRIORITY");

        assert_eq!(val, "from_dotenv");
        // The losing XDG value does not count as applied.
        assert_eq!(applied, 1);
    }

    #[test]
    fn xdg_applied_when_no_dotenv() {
        let xdg_dir = tempfile::tempdir().unwrap();
        write_xdg_config(xdg_dir.path(), "FOREMAN_CFG_TEST_XDG_ONLY", "from_xdg");
        let empty_dir = tempfile::tempdir().unwrap();

        env::remove_var("FOREMAN_CFG_TEST_XDG_ONLY");
        let _ = with_xdg_home(xdg_dir.path(), || {
            load_and_apply("foreman", Some(empty_dir.path()))
        });
        let val = env::var("FOREMAN_CFG_TEST_XDG_ONLY").unwrap();
        env::remove_var("FOREMAN_CFG_TEST_XDG_ONLY");

        assert_eq!(val, "from_xdg");
    }

    #[test]
    fn dotenv_only_when_no_xdg() {
        let xdg_dir = tempfile::tempdir().unwrap(); // no config.toml inside
        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "FOREMAN_CFG_TEST_DOTENV_ONLY=from_dotenv\n",
        )
        .unwrap();

        env::remove_var("FOREMAN_CFG_TEST_DOTENV_ONLY");
        let _ = with_xdg_home(xdg_dir.path(), || {
            load_and_apply("foreman", Some(dotenv_dir.path()))
        });
        let val = env::var("FOREMAN_CFG_TEST_DOTENV_ONLY").unwrap();
        env::remove_var("FOREMAN_CFG_TEST_DOTENV_ONLY");

        assert_eq!(val, "from_dotenv");
    }

    #[test]
    fn invalid_xdg_toml_fails_with_xdg_parse_error() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("foreman");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "not valid toml [[[\n").unwrap();
        let empty_dir = tempfile::tempdir().unwrap();

        let result = with_xdg_home(xdg_dir.path(), || {
            load_and_apply("foreman", Some(empty_dir.path()))
        });
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }

    #[test]
    fn env_or_falls_back_on_unset_and_empty() {
        env::remove_var("FOREMAN_CFG_TEST_FALLBACK");
        assert_eq!(env_or("FOREMAN_CFG_TEST_FALLBACK", "dflt"), "dflt");
        env::set_var("FOREMAN_CFG_TEST_FALLBACK", "");
        assert_eq!(env_or("FOREMAN_CFG_TEST_FALLBACK", "dflt"), "dflt");
        env::set_var("FOREMAN_CFG_TEST_FALLBACK", "set");
        assert_eq!(env_or("FOREMAN_CFG_TEST_FALLBACK", "dflt"), "set");
        env::remove_var("FOREMAN_CFG_TEST_FALLBACK");
    }
}
