//! Pulls page links that share a base prefix out of fetched content.
//! Used for crawl-driven ingestion, where each linked page becomes a new source.

use std::collections::HashSet;

use regex::Regex;

/// Returns every URL in `content` that starts with `base` followed by one or more
/// ASCII letters, digits or hyphens. Duplicates are dropped; first-seen order is kept.
///
/// `base` is matched literally, so `.` and `/` in it carry no regex meaning.
/// An empty `base` returns every run of those characters.
pub fn extract_links(content: &str, base: &str) -> Vec<String> {
    let pattern = format!("{}[a-zA-Z0-9-]+", regex::escape(base));
    let re = Regex::new(&pattern).expect("escaped prefix plus a character class is a valid pattern");
    let mut seen = HashSet::new();
    re.find_iter(content)
        .map(|m| m.as_str())
        .filter(|link| seen.insert(*link))
        .map(str::to_string)
        .collect()
}
