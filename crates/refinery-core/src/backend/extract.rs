//! Pull the candidate program out of a free-form backend response.

use std::sync::OnceLock;

use regex::Regex;

/// Entry point every candidate must define.
pub const ENTRY_POINT: &str = "def transform";

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*(?:python3?|py)?[ \t]*\r?\n(.*?)```").expect("valid fence regex")
    })
}

/// Extract the `transform` definition from `response`.
///
/// Prefers the last fenced code block that defines the entry point, then
/// falls back to the raw text if it defines it. Returns `None` when neither
/// holds; the caller treats that as a malformed candidate.
pub fn extract_transform(response: &str) -> Option<String> {
    let fenced = fence_re()
        .captures_iter(response)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str())
        .filter(|block| block.contains(ENTRY_POINT))
        .last();

    if let Some(block) = fenced {
        return Some(block.trim_end().to_string() + "\n");
    }

    if response.contains(ENTRY_POINT) && !response.contains("```") {
        return Some(response.trim().to_string() + "\n");
    }

    None
}
