//! Best-effort cleanup of raw generation output.
//!
//! Models often wrap the document in commentary or a Markdown code fence.
//! [`sanitize`] strips that wrapping without ever failing; content it does
//! not recognise is passed through untouched.

use std::sync::LazyLock;

use regex::Regex;

static DOCTYPE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!doctype\s+html").expect("doctype marker pattern is valid")
});

const FENCE: &str = "```";

/// Extract the canonical document from a generation response.
///
/// Policy, first match wins:
/// 1. A `<!DOCTYPE html` marker anywhere → everything from the marker on.
/// 2. Text fenced with ```` ``` ```` on both ends → the interior lines.
/// 3. Anything else → unchanged.
pub fn sanitize(raw: &str) -> String {
    if let Some(m) = DOCTYPE_MARKER.find(raw) {
        return raw[m.start()..].to_string();
    }

    let trimmed = raw.trim();
    if trimmed.starts_with(FENCE) && trimmed.ends_with(FENCE) && trimmed.len() > FENCE.len() {
        return strip_outer_lines(trimmed);
    }

    raw.to_string()
}

/// Drop the first and last line (the fence lines of a fenced block).
pub(crate) fn strip_outer_lines(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= 2 {
        return String::new();
    }
    lines[1..lines.len() - 1].join("\n")
}
