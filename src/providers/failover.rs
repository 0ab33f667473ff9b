//! Failover across the configured model chain.
//!
//! [`invoke_with_failover`] tries each [`ModelEntry`] in order. A failure is
//! classified with [`classify_error_message`]:
//!
//! - `max_tokens_out_of_range`: the same model is retried once with a smaller
//!   output budget, clamped to the provider maximum, before moving on;
//! - anything else: move to the next model.
//!
//! When every model has failed the last error is returned. A successful call
//! never carries the errors of earlier attempts.

use tracing::{info, warn};

use crate::error::{ClawgateError, Result};
use crate::session::Message;
use crate::utils::string::log_field;

use super::error_classifier::{classify_error_message, ErrorClass};
use super::registry::ModelEntry;
use super::{ChatOptions, LLMResponse, ToolDefinition};

/// Default ceiling for output tokens accepted by most providers.
pub const DEFAULT_PROVIDER_MAX_TOKENS: u32 = 8192;

/// Smallest budget a reduced retry will ask for.
pub const MIN_RETRY_MAX_TOKENS: u32 = 256;

/// Token-budget limits used when retrying a `max_tokens` rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverPolicy {
    pub provider_max_tokens: u32,
    pub min_max_tokens: u32,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            provider_max_tokens: DEFAULT_PROVIDER_MAX_TOKENS,
            min_max_tokens: MIN_RETRY_MAX_TOKENS,
        }
    }
}

impl FailoverPolicy {
    pub fn with_provider_max_tokens(mut self, max: u32) -> Self {
        self.provider_max_tokens = max.max(1);
        self
    }

    /// Budget for the retry after a `max_tokens` rejection.
    ///
    /// A budget above the provider maximum is clamped to it; otherwise it is
    /// halved, never going below `min_max_tokens`. Returns `None` when the
    /// result would not be smaller than `current`.
    ///
    /// # Example
    /// ```
    /// use clawgate::providers::FailoverPolicy;
    ///
    /// let policy = FailoverPolicy::default();
    /// assert_eq!(policy.reduced_max_tokens(Some(32_000)), Some(8192));
    /// assert_eq!(policy.reduced_max_tokens(Some(8192)), Some(4096));
    /// assert_eq!(policy.reduced_max_tokens(Some(256)), None);
    /// ```
    pub fn reduced_max_tokens(&self, current: Option<u32>) -> Option<u32> {
        let floor = self.min_max_tokens.min(self.provider_max_tokens);
        let current = current.unwrap_or(self.provider_max_tokens);
        let reduced = if current > self.provider_max_tokens {
            self.provider_max_tokens
        } else {
            (current / 2).max(floor)
        };
        (reduced < current).then_some(reduced)
    }
}

/// A successful call and where it was served from.
#[derive(Debug, Clone)]
pub struct FailoverResponse {
    pub response: LLMResponse,
    /// Alias of the model that answered.
    pub model_name: String,
    /// Provider calls made, including the successful one.
    pub attempts: usize,
}

/// Run one chat completion against `chain`, failing over in order.
pub async fn invoke_with_failover(
    chain: &[ModelEntry],
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    options: ChatOptions,
    policy: &FailoverPolicy,
) -> Result<FailoverResponse> {
    let mut last_err: Option<ClawgateError> = None;
    let mut attempts = 0usize;

    for entry in chain {
        let mut opts = options.clone();
        let mut budget_retried = false;

        loop {
            attempts += 1;
            let result = entry
                .provider
                .chat(
                    messages.clone(),
                    tools.clone(),
                    Some(entry.config.model_id()),
                    opts.clone(),
                )
                .await;

            let err = match result {
                Ok(response) => {
                    if attempts > 1 {
                        info!(
                            model_name = %entry.config.model_name,
                            attempts,
                            "Provider call succeeded after failover"
                        );
                    }
                    return Ok(FailoverResponse {
                        response,
                        model_name: entry.config.model_name.clone(),
                        attempts,
                    });
                }
                Err(err) => err,
            };

            let text = err.to_string();
            let class = classify_error_message(&text);
            warn!(
                model_name = %entry.config.model_name,
                model = %entry.config.model,
                class = %class,
                error = %log_field("error", &text),
                "Provider call failed"
            );

            if class == ErrorClass::MaxTokensOutOfRange && !budget_retried {
                if let Some(reduced) = policy.reduced_max_tokens(opts.max_tokens) {
                    info!(
                        model_name = %entry.config.model_name,
                        from = ?opts.max_tokens,
                        to = reduced,
                        "Retrying with reduced max_tokens"
                    );
                    budget_retried = true;
                    opts.max_tokens = Some(reduced);
                    continue;
                }
            }

            last_err = Some(err);
            break;
        }
    }

    Err(last_err.unwrap_or_else(|| {
        ClawgateError::Config("no models available for this request".to_string())
    }))
}
