//! Load `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml`.
//!
//! Base-dir resolution goes through [`cross_xdg`], so the same lookup works
//! on Linux, macOS and Windows.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

fn config_path(app_name: &str) -> Result<PathBuf, LoadError> {
    let base = cross_xdg::BaseDirs::new().map_err(|e| LoadError::XdgPath(e.to_string()))?;
    Ok(base.config_home().join(app_name).join("config.toml"))
}

/// Returns env key-value pairs from the `[env]` section. Missing file or section yields an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = config_path(app_name)?;
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let value: toml::Value = toml::from_str(&content)?;

    let mut out = HashMap::new();
    if let Some(env) = value.get("env").and_then(|v| v.as_table()) {
        for (k, v) in env {
            if let Some(s) = v.as_str() {
                out.insert(k.clone(), s.to_string());
            }
        }
    }
    Ok(out)
}
