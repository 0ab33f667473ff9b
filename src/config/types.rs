//! Configuration type definitions for Clawgate
//!
//! Every struct has sensible defaults and `#[serde(default)]`, so a partial
//! `config.json` only needs the fields it changes.

use serde::{Deserialize, Serialize};

use crate::error::{ClawgateError, Result};
use crate::providers::vendor_spec;

/// Main configuration struct for Clawgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent configuration (model, tokens, iterations, history)
    pub agents: AgentConfig,
    /// Configured LLM models, in failover order
    pub model_list: Vec<ModelConfig>,
    /// Gateway (web API) server configuration
    pub gateway: GatewayConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Background subagent configuration
    pub subagents: SubagentConfig,
    /// Scheduled jobs
    pub cron: CronConfig,
    /// Channel adapter configurations
    pub channels: ChannelsConfig,
}

// ============================================================================
// Agent Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default agent settings
    pub defaults: AgentDefaults,
}

/// Default agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    /// Alias of the default model in `model_list`
    pub model_name: String,
    /// Maximum tokens requested per provider call
    pub max_tokens: u32,
    /// Temperature for generation
    pub temperature: f32,
    /// Maximum provider round-trips with tool calls per turn
    pub max_tool_iterations: u32,
    /// Number of most recent session messages sent to the provider
    pub history_window: usize,
    /// Upper bound applied when retrying a rejected `max_tokens` value
    pub provider_max_tokens: u32,
    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
            history_window: 40,
            provider_max_tokens: 8192,
            system_prompt: None,
        }
    }
}

// ============================================================================
// Model Configuration
// ============================================================================

/// Hide all but the last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n <= 4 => "****".to_string(),
        n => {
            let tail: String = chars[n - 4..].iter().collect();
            format!("****{}", tail)
        }
    }
}

/// One configured model endpoint.
///
/// `model` is `vendor/model-id`; `model_name` is the alias users refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl ModelConfig {
    /// Create a model entry.
    ///
    /// # Example
    /// ```
    /// use clawgate::config::ModelConfig;
    ///
    /// let model = ModelConfig::new("fast", "groq/llama-3.1-8b-instant").with_api_key("gsk-1");
    /// assert_eq!(model.vendor(), "groq");
    /// assert_eq!(model.model_id(), "llama-3.1-8b-instant");
    /// assert!(model.validate().is_ok());
    /// ```
    pub fn new(model_name: &str, model: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            model: model.to_string(),
            api_key: String::new(),
            api_base: None,
        }
    }

    /// Build an entry from a bare or prefixed model string.
    ///
    /// A model without a vendor prefix is assumed to be `openai/`, and the
    /// alias defaults to the model id.
    pub fn from_model(model: &str) -> Self {
        let model = model.trim();
        let full = if model.contains('/') {
            model.to_string()
        } else {
            format!("openai/{}", model)
        };
        let mut cfg = Self::new("", &full);
        cfg.model_name = cfg.model_id().to_string();
        cfg
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = key.to_string();
        self
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = Some(base.to_string());
        self
    }

    /// Vendor prefix, e.g. `openai` for `openai/gpt-4o`.
    pub fn vendor(&self) -> &str {
        self.model.split_once('/').map(|(v, _)| v).unwrap_or("")
    }

    /// Model id sent on the wire, e.g. `gpt-4o` for `openai/gpt-4o`.
    pub fn model_id(&self) -> &str {
        self.model
            .split_once('/')
            .map(|(_, id)| id)
            .unwrap_or(&self.model)
    }

    /// API key with all but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }

    /// Check the entry is usable.
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(ClawgateError::Config(format!(
                "model '{}' has an empty model_name",
                self.model
            )));
        }

        let (vendor, id) = self.model.split_once('/').ok_or_else(|| {
            ClawgateError::Config(format!(
                "model '{}' for '{}' must be in vendor/model form",
                self.model, self.model_name
            ))
        })?;
        if vendor.is_empty() || id.is_empty() || self.model.chars().any(char::is_whitespace) {
            return Err(ClawgateError::Config(format!(
                "model '{}' for '{}' must be in vendor/model form",
                self.model, self.model_name
            )));
        }

        if let Some(base) = self.api_base.as_deref() {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(ClawgateError::Config(format!(
                    "api_base '{}' for '{}' must start with http:// or https://",
                    base, self.model_name
                )));
            }
        }

        match vendor_spec(vendor) {
            Some(spec) if spec.requires_api_key && self.api_key.trim().is_empty() => {
                Err(ClawgateError::Config(format!(
                    "model '{}' ({}) requires an api_key",
                    self.model_name, vendor
                )))
            }
            Some(_) => Ok(()),
            None if self.api_base.is_none() => Err(ClawgateError::Config(format!(
                "model '{}' uses unknown vendor '{}' and needs an api_base",
                self.model_name, vendor
            ))),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Gateway Configuration
// ============================================================================

/// Gateway (web API) server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18790,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Compact single-line output with a `component` field
    #[default]
    Component,
    /// JSON lines
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Append JSON logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}

// ============================================================================
// Subagent Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentConfig {
    /// Maximum subagents running at once (0 = unbounded)
    pub max_concurrent: usize,
}

impl SubagentConfig {
    pub fn limit(&self) -> Option<usize> {
        (self.max_concurrent > 0).then_some(self.max_concurrent)
    }
}

// ============================================================================
// Cron Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Jobs registered with the scheduler at gateway start
    pub jobs: Vec<crate::cron::CronJob>,
}

// ============================================================================
// Channel Configurations
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Generic HTTP webhook channel
    pub webhook: Option<WebhookConfig>,
}

/// Webhook channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    /// Address to bind the HTTP server to
    pub bind_address: String,
    pub port: u16,
    /// URL path to accept webhook requests on
    pub path: String,
    /// Optional bearer token required on inbound requests
    pub auth_token: Option<String>,
    /// Replies are POSTed here; when unset they are only logged
    pub callback_url: Option<String>,
    /// Allowlist of sender IDs (empty = allow all)
    pub allow_from: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            port: 9876,
            path: "/webhook".to_string(),
            auth_token: None,
            callback_url: None,
            allow_from: Vec::new(),
        }
    }
}
