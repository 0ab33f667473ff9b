//! Error types for Clawgate
//!
//! This module defines the error types used throughout the gateway.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured provider error, derived from the HTTP status of a failed call.
///
/// The message keeps the vendor's response body so that the text classifier
/// in [`crate::providers::error_classifier`] can still inspect it.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// 401/403 — Invalid API key or authentication failure
    Auth(String),
    /// 429 — Rate limit or quota exceeded
    RateLimit(String),
    /// 402 — Payment required or billing issue
    Billing(String),
    /// 500/502/503/504 — Server-side errors
    ServerError(String),
    /// 400 — Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404 — Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection or read timeout
    Timeout(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::Billing(msg) => write!(f, "Billing error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::Billing(_) => Some(402),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Timeout(_) => None,
            ProviderError::Unknown(_) => None,
        }
    }
}

impl From<ProviderError> for ClawgateError {
    fn from(err: ProviderError) -> Self {
        ClawgateError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for Clawgate operations.
#[derive(Error, Debug)]
pub enum ClawgateError {
    /// Configuration-related errors (invalid model list, missing manager, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Untyped provider errors (failover exhaustion, malformed responses)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error built from an HTTP status.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Channel errors (adapter start failures, send failures)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Tool execution errors (invalid parameters, execution failures, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Session management errors (invalid state, persistence failures, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Background subagent errors
    #[error("Subagent error: {0}")]
    Subagent(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Message bus closed
    #[error("Bus error: channel closed")]
    BusClosed,

    /// Resource not found (sessions, models, subagent tasks, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// A turn or task was cancelled before it finished
    #[error("Cancelled")]
    Cancelled,
}

/// A specialized `Result` type for Clawgate operations.
pub type Result<T> = std::result::Result<T, ClawgateError>;
