//! Shared utility functions for the pagesmith crate.

/// Maximum repository name length accepted by GitHub.
const MAX_REPO_NAME_LEN: usize = 100;

/// Check that a task name can be used verbatim as a repository name.
/// Allows ASCII alphanumerics, `-`, `_` and `.`; rejects `.` and `..`.
pub fn is_valid_repo_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_REPO_NAME_LEN || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Mask a secret for display, keeping only its length visible.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "<unset>".to_string()
    } else {
        format!("<{} chars>", secret.chars().count())
    }
}

/// Truncate text for log fields, respecting char boundaries.
pub fn preview(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        text
    } else {
        &text[..text.floor_char_boundary(max_len)]
    }
}
