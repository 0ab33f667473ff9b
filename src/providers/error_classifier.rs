//! Pattern-based error classification for LLM provider errors.
//!
//! Vendors report failures as free text, so classification is a best-effort
//! heuristic over the lowercased message. Checks run in priority order:
//! max_tokens out of range > context overflow > auth > transient.
//! Falls back to `Unknown` if no pattern matches.

use std::fmt;

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The requested output budget is outside what the model accepts.
    MaxTokensOutOfRange,
    /// The prompt does not fit in the model's context window.
    ContextOverflow,
    /// Credentials or account problems (401/403, billing).
    AuthError,
    /// Rate limits, timeouts, overload and 5xx responses.
    Transient,
    /// Anything else.
    Unknown,
}

impl ErrorClass {
    /// Plain-language text shown to end users when a turn fails with this class.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorClass::ContextOverflow => {
                "This conversation has grown too long for the model. Please start a new topic."
            }
            ErrorClass::AuthError => {
                "The assistant could not reach its language model. Please check the model configuration."
            }
            ErrorClass::Transient => {
                "The language model is busy right now. Please try again in a moment."
            }
            ErrorClass::MaxTokensOutOfRange | ErrorClass::Unknown => {
                "Sorry, something went wrong while processing your message."
            }
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::MaxTokensOutOfRange => "max_tokens_out_of_range",
            ErrorClass::ContextOverflow => "context_overflow",
            ErrorClass::AuthError => "auth_error",
            ErrorClass::Transient => "transient",
            ErrorClass::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

const MAX_TOKENS_PARAM_HINTS: &[&str] = &[
    "max_tokens",
    "max_completion_tokens",
    "max_output_tokens",
    "max completion tokens",
    "max output tokens",
];

/// Structured `"param"` fields, matched against the whitespace-free message.
const MAX_TOKENS_PARAM_FIELDS: &[&str] = &[
    "\"param\":\"max_tokens\"",
    "\"param\":\"max_completion_tokens\"",
    "\"param\":\"max_output_tokens\"",
];

const RANGE_HINTS: &[&str] = &[
    "out of range",
    "must be",
    "between",
    "less than or equal",
    "greater than or equal",
    "too large",
    "cannot exceed",
    "exceed",
    "invalid",
];

const CONTEXT_OVERFLOW_PATTERNS: &[&str] = &[
    "context length",
    "context_length_exceeded",
    "context window",
    "maximum context",
    "prompt is too long",
    "too many tokens",
];

const AUTH_PATTERNS: &[&str] = &[
    "invalid_api_key",
    "invalid api key",
    "incorrect api key",
    "authentication",
    "unauthorized",
    "forbidden",
    "permission denied",
    "401",
    "403",
    "402",
    "payment required",
    "insufficient credits",
    "billing",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "too many requests",
    "429",
    "timeout",
    "timed out",
    "deadline exceeded",
    "overloaded",
    "server error",
    "service unavailable",
    "bad gateway",
    "500",
    "502",
    "503",
    "504",
    "connection",
    "temporarily",
];

/// Returns true when `msg` names an output-token parameter AND says its value
/// is out of range.
///
/// Either hint alone is not enough: "context length exceeded maximum tokens"
/// mentions a limit without the parameter, and "unknown field max_tokens"
/// mentions the parameter without a range.
///
/// # Example
/// ```
/// use clawgate::providers::is_max_tokens_out_of_range;
///
/// assert!(is_max_tokens_out_of_range("max_tokens must be between 1 and 8192"));
/// assert!(!is_max_tokens_out_of_range("value must be between 1 and 8192"));
/// ```
pub fn is_max_tokens_out_of_range(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    let compact: String = lower.chars().filter(|c| !c.is_whitespace()).collect();

    let has_param = contains_any(&lower, MAX_TOKENS_PARAM_HINTS)
        || contains_any(&compact, MAX_TOKENS_PARAM_FIELDS);
    has_param && contains_any(&lower, RANGE_HINTS)
}

/// Classify an error message string.
pub fn classify_error_message(msg: &str) -> ErrorClass {
    if is_max_tokens_out_of_range(msg) {
        return ErrorClass::MaxTokensOutOfRange;
    }

    let lower = msg.to_lowercase();
    if contains_any(&lower, CONTEXT_OVERFLOW_PATTERNS) {
        return ErrorClass::ContextOverflow;
    }
    if contains_any(&lower, AUTH_PATTERNS) {
        return ErrorClass::AuthError;
    }
    if contains_any(&lower, TRANSIENT_PATTERNS) {
        return ErrorClass::Transient;
    }
    ErrorClass::Unknown
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}
