//! UTF-8 safe string helpers for log previews.
//!
//! Everything here counts Unicode scalar values, never bytes, so slicing
//! multibyte text cannot panic.

/// A field whose name contains one of these is truncated before it is logged.
pub const SENSITIVE_FIELD_TOKENS: &[&str] = &[
    "content",
    "text",
    "message",
    "prompt",
    "response",
    "argument",
    "args",
    "input",
    "output",
    "preview",
    "history",
    "query",
    "error",
];

/// Maximum characters logged for a sensitive field, ellipsis included.
pub const SENSITIVE_PREVIEW_CHARS: usize = 120;

/// Return the first `n` characters of `s` as a `String` (no ellipsis).
pub fn prefix_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Return a preview of `s` up to `n` characters, with a trailing `...`
/// when anything was cut.
pub fn preview(s: &str, n: usize) -> String {
    let mut prefix = prefix_chars(s, n);
    if s.chars().nth(n).is_some() {
        prefix.push_str("...");
    }
    prefix
}

/// First non-empty line of `s`, trimmed.
pub fn first_line(s: &str) -> &str {
    s.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

/// Whether a log field name matches [`SENSITIVE_FIELD_TOKENS`] (case-insensitive).
pub fn is_sensitive_field(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    SENSITIVE_FIELD_TOKENS.iter().any(|token| key.contains(token))
}

/// Render a field value for logging.
///
/// Sensitive fields are flattened to one line and cut to
/// [`SENSITIVE_PREVIEW_CHARS`]. Applying it twice changes nothing.
///
/// ```
/// use clawgate::utils::string::log_field;
///
/// let long = "x".repeat(500);
/// assert_eq!(log_field("content", &long).chars().count(), 120);
/// assert_eq!(log_field("tool_error", "a\nb"), "a b");
/// assert_eq!(log_field("channel", "telegram"), "telegram");
/// ```
pub fn log_field(key: &str, value: &str) -> String {
    if !is_sensitive_field(key) {
        return value.to_string();
    }
    let flat: String = value
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= SENSITIVE_PREVIEW_CHARS {
        flat
    } else {
        let mut cut = prefix_chars(&flat, SENSITIVE_PREVIEW_CHARS - 3);
        cut.push_str("...");
        cut
    }
}
