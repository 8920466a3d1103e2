use std::sync::LazyLock;

use regex::Regex;

/// The bracketed "found" marker authors add to a post once the place is identified.
pub const FOUND_MARKER: &str = "[НАЙДЕНО]";

static FOUND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[НАЙДЕНО\]").expect("valid regex"));

/// Whether the post text carries the found marker, in any letter case.
pub fn is_found(post_text: &str) -> bool {
    FOUND_RE.is_match(post_text)
}
