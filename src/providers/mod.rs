//! Providers module - LLM invocation, error classification and failover
//!
//! - [`LLMProvider`]: one vendor endpoint (the thin transport).
//! - [`ProviderRegistry`]: the validated model list and name resolution.
//! - [`invoke_with_failover`]: walks the model chain, retrying `max_tokens`
//!   rejections once with a reduced budget.
//! - [`classify_error_message`]: pure text classifier for provider failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use clawgate::config::Config;
//! use clawgate::providers::{invoke_with_failover, ChatOptions, FailoverPolicy, ProviderRegistry};
//! use clawgate::session::Message;
//!
//! async fn example(config: &Config) -> clawgate::Result<()> {
//!     let registry = ProviderRegistry::from_config(config)?;
//!     let chain = registry.chain(None).await?;
//!     let out = invoke_with_failover(
//!         &chain,
//!         vec![Message::user("Hello!")],
//!         vec![],
//!         ChatOptions::new().with_max_tokens(1024),
//!         &FailoverPolicy::default(),
//!     )
//!     .await?;
//!     println!("{} answered: {}", out.model_name, out.response.content);
//!     Ok(())
//! }
//! ```

pub mod error_classifier;
pub mod failover;
pub mod openai;
pub mod registry;
mod types;

use crate::error::ProviderError;

pub use error_classifier::{classify_error_message, is_max_tokens_out_of_range, ErrorClass};
pub use failover::{invoke_with_failover, FailoverPolicy, FailoverResponse};
pub use openai::OpenAICompatProvider;
pub use registry::{
    vendor_spec, HttpProviderFactory, ModelEntry, ProviderFactory, ProviderRegistry, VendorSpec,
    VENDOR_REGISTRY,
};
pub use types::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

/// Map an HTTP status code and response body to a [`ProviderError`].
///
/// The body is kept verbatim so the text classifier can still see hints
/// such as `"param":"max_tokens"`.
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(body.to_string()),
        402 => ProviderError::Billing(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        408 | 504 => ProviderError::Timeout(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 | 422 => ProviderError::InvalidRequest(body.to_string()),
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}
