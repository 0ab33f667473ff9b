//! OpenAI-compatible Chat Completions transport
//!
//! Nearly every supported vendor (OpenAI, OpenRouter, Groq, DeepSeek, Ollama,
//! vLLM, Anthropic's compatibility endpoint, ...) speaks the OpenAI
//! `/chat/completions` dialect, so one transport covers the whole model list.
//! This is the thin "invoke" layer: it converts messages, sends one request
//! and maps HTTP failures to [`ProviderError`] with the vendor's body intact.
//!
//! # Example
//!
//! ```rust,ignore
//! use clawgate::config::ModelConfig;
//! use clawgate::providers::{openai::OpenAICompatProvider, ChatOptions, LLMProvider};
//! use clawgate::session::Message;
//!
//! async fn example() {
//!     let model = ModelConfig::new("gpt", "openai/gpt-4o-mini").with_api_key("sk-...");
//!     let provider = OpenAICompatProvider::from_model_config(&model).unwrap();
//!     let response = provider
//!         .chat(vec![Message::user("Hello!")], vec![], None, ChatOptions::default())
//!         .await
//!         .unwrap();
//!     println!("{}", response.content);
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{ClawgateError, ProviderError, Result};
use crate::session::{Message, Role};

use super::registry::vendor_spec;
use super::{
    parse_provider_error, ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition,
    Usage,
};

/// Request timeout for a single completion call.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP client whose requests fail after `timeout`.
pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ClawgateError::Config(format!("failed to build HTTP client: {}", e)))
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ============================================================================
// Provider
// ============================================================================

/// Provider for any vendor exposing an OpenAI-compatible endpoint.
pub struct OpenAICompatProvider {
    vendor: String,
    model: String,
    api_key: String,
    api_base: String,
    client: Client,
}

impl OpenAICompatProvider {
    /// Build a provider for a validated model entry.
    ///
    /// The endpoint is the entry's `api_base` or, when unset, the vendor's
    /// well-known base URL.
    pub fn from_model_config(model: &ModelConfig) -> Result<Self> {
        Self::with_client(model, http_client(REQUEST_TIMEOUT)?)
    }

    /// Build a provider sharing an existing HTTP client.
    pub fn with_client(model: &ModelConfig, client: Client) -> Result<Self> {
        let api_base = match model.api_base.as_deref() {
            Some(base) if !base.trim().is_empty() => base.to_string(),
            _ => vendor_spec(model.vendor())
                .map(|spec| spec.default_api_base.to_string())
                .ok_or_else(|| {
                    ClawgateError::Config(format!(
                        "model '{}' has no api_base and vendor '{}' has no default endpoint",
                        model.model_name,
                        model.vendor()
                    ))
                })?,
        };

        Ok(Self {
            vendor: model.vendor().to_string(),
            model: model.model_id().to_string(),
            api_key: model.api_key.clone(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// The resolved base URL, without trailing slash.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn convert_messages(messages: Vec<Message>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let tool_calls = msg.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|tc| WireToolCall {
                        id: tc.id,
                        kind: function_type(),
                        function: WireFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect::<Vec<_>>()
            });

            WireMessage {
                role: role_str(&msg.role),
                content: if msg.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(msg.content)
                },
                tool_calls,
                tool_call_id: msg.tool_call_id,
            }
        })
        .collect()
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<WireTool> {
    tools
        .into_iter()
        .map(|t| WireTool {
            kind: "function",
            function: WireFunctionDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        })
        .collect()
}

fn convert_response(response: ChatResponse) -> LLMResponse {
    let (content, tool_calls) = match response.choices.into_iter().next() {
        Some(choice) => {
            let calls: Vec<LLMToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| LLMToolCall::new(&tc.id, &tc.function.name, &tc.function.arguments))
                .collect();
            (choice.message.content.unwrap_or_default(), calls)
        }
        None => (String::new(), Vec::new()),
    };

    let mut out = LLMResponse::with_tools(&content, tool_calls);
    if let Some(usage) = response.usage {
        out = out.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
    }
    out
}

#[async_trait]
impl LLMProvider for OpenAICompatProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.unwrap_or(&self.model);
        let request = ChatRequest {
            model: model.to_string(),
            messages: convert_messages(messages),
            tools: if tools.is_empty() {
                None
            } else {
                Some(convert_tools(tools))
            },
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        debug!(vendor = %self.vendor, model = %model, "Sending chat completion request");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ClawgateError::from(ProviderError::Timeout(e.to_string()))
            } else {
                ClawgateError::Provider(format!("{} request failed: {}", self.vendor, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_provider_error(status.as_u16(), &body).into());
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ClawgateError::Provider(format!("failed to parse {} response: {}", self.vendor, e))
        })?;
        Ok(convert_response(parsed))
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        &self.vendor
    }
}
