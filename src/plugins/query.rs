//! Splitting of query scripts into individual statements.

use regex::Regex;
use std::sync::LazyLock;

/// `-- …` line comments and `/* … */` block comments.
static COMMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(--[^\n]*)|(/\*.*?\*/)").unwrap());

/// Extracts the `;`-separated statements of `content`, ignoring `-- …` line
/// comments and `/* … */` block comments. Empty statements are dropped.
pub fn extract_requests(content: &str) -> Vec<String> {
    let without_comments = COMMENT_PATTERN.replace_all(content, "");
    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
