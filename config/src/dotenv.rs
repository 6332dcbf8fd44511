//! Parse `.env` file into key-value map (no overwrite of existing env here; applied in lib).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Path to `.env`: `override_dir` if given, else current directory. `None` when absent.
fn dotenv_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = match override_dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().ok()?,
    };
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

/// Strips matching surrounding quotes. Double quotes support `\"` escapes; single quotes none.
fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].replace("\\\"", "\"");
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

/// Minimal .env parser: `KEY=VALUE` lines, `#` comment lines and blanks skipped,
/// optional `export ` prefix tolerated. No multiline values or line continuations.
fn parse_dotenv(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (k, v) = line.split_once('=')?;
            let key = k.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(v.trim())))
        })
        .collect()
}

/// Load `.env` from override_dir or current directory into a map. Missing file returns empty map.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    match dotenv_path(override_dir) {
        Some(path) => Ok(parse_dotenv(&std::fs::read_to_string(path)?)),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_quoted_pairs() {
        let m = parse_dotenv("FOO=bar\nMSG=\"hello world\"\nALT='single'\n");
        assert_eq!(m.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(m.get("MSG"), Some(&"hello world".to_string()));
        assert_eq!(m.get("ALT"), Some(&"single".to_string()));
    }

    #[test]
    fn skips_comments_blanks_and_malformed_lines() {
        let m = parse_dotenv("# top\n\nKEY=val\nno_equals_here\n=value_only\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("KEY"), Some(&"val".to_string()));
    }

    #[test]
    fn export_prefix_tolerated() {
        let m = parse_dotenv("export TOKEN=abc\n");
        assert_eq!(m.get("TOKEN"), Some(&"abc".to_string()));
    }

    #[test]
    fn escaped_double_quote_kept() {
        let m = parse_dotenv(r#"KEY="say \"hi\"""#);
        assert_eq!(m.get("KEY"), Some(&r#"say "hi""#.to_string()));
    }

    #[test]
    fn empty_value_allowed() {
        let m = parse_dotenv("KEY=\n");
        assert_eq!(m.get("KEY"), Some(&String::new()));
    }

    #[test]
    fn missing_file_returns_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert!(m.is_empty());
    }
}
