//! Extraction of `<analysis>` and `<repo_memory>` regions from assistant text.

use regex::RegexBuilder;

/// Returns the content inside `<tag>...</tag>`, or `None`. Case-insensitive;
/// the region may span lines. `tag` must be a plain identifier.
pub fn extract_tag(text: &str, tag: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    debug_assert!(tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    let pattern = format!(r"<{tag}>\s*(.*?)\s*</{tag}>");
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
