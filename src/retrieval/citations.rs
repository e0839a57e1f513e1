//! Markdown citation parsing.

use std::sync::LazyLock;

use regex::Regex;

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\((https?://[^\s)]+)\)").unwrap());

/// A `[label](url)` link found in an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub label: String,
    pub url: String,
}

/// All markdown links in `text`, in order of appearance.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    CITATION_RE
        .captures_iter(text)
        .map(|c| Citation {
            label: c[1].to_string(),
            url: c[2].to_string(),
        })
        .collect()
}

/// Cited URLs that are not among `allowed`.
pub fn foreign_citations<'a>(citations: &'a [Citation], allowed: &[&str]) -> Vec<&'a str> {
    citations
        .iter()
        .map(|c| c.url.as_str())
        .filter(|url| !allowed.contains(url))
        .collect()
}
