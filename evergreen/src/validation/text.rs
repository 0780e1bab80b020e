//! Text measurements used by structural checks.

use regex::Regex;
use std::sync::LazyLock;

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s+(\S.*)$").expect("valid regex"));
static SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s+\S").expect("valid regex"));

/// Counts whitespace-separated words.
#[must_use]
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Returns the text of a leading `# Title` line, ignoring blank lines
/// before it.
#[must_use]
pub fn markdown_title(markdown: &str) -> Option<&str> {
    let first = markdown.lines().find(|line| !line.trim().is_empty())?;
    TITLE
        .captures(first.trim_end())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Counts `## ` section headings.
#[must_use]
pub fn count_section_headings(markdown: &str) -> usize {
    SECTION_HEADING.find_iter(markdown).count()
}
