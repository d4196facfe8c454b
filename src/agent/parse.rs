//! Helpers for role output parsers.
//!
//! Agents rarely answer with bare JSON: they wrap it in a fenced code block
//! or surround it with prose. These helpers pull the JSON payload out so the
//! role parser can deserialize it.

use regex::Regex;
use std::sync::LazyLock;

/// Fenced block, optionally tagged `json`.
static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)\n?```").expect("valid fenced block regex")
});

/// Locate the JSON payload in raw agent text.
///
/// Tries, in order: the whole text, each fenced code block, then the
/// widest `{...}` or `[...]` span.
pub fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    for caps in FENCED_BLOCK_RE.captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str(body.as_str().trim()) {
                return Some(value);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}
