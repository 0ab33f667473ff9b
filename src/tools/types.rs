//! Tool types for Clawgate
//!
//! The `Tool` trait every tool implements, the `ToolOutput` envelope it
//! returns, and the `ToolContext` describing where the call came from.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Dual-audience tool result.
///
/// `for_llm` is fed back to the model verbatim. `for_user`, when set, is
/// published to the originating chat as soon as the tool returns.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Content sent to the LLM as the tool result.
    pub for_llm: String,
    /// Content sent to the user. `None` = silent.
    pub for_user: Option<String>,
    /// Whether this result represents an error condition.
    pub is_error: bool,
}

impl ToolOutput {
    /// LLM-only result. User sees nothing.
    pub fn llm_only(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            is_error: false,
        }
    }

    /// Both LLM and user see the same content.
    pub fn user_visible(content: impl Into<String>) -> Self {
        let s = content.into();
        Self {
            for_llm: s.clone(),
            for_user: Some(s),
            is_error: false,
        }
    }

    /// Error result. LLM sees the error; user sees nothing by default.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            is_error: true,
        }
    }

    /// Attach a user-facing text, keeping `for_llm` as is.
    ///
    /// ```
    /// use clawgate::tools::ToolOutput;
    ///
    /// let out = ToolOutput::llm_only("{\"rows\": 42}").with_user("Found 42 rows");
    /// assert_eq!(out.for_user.as_deref(), Some("Found 42 rows"));
    /// assert!(!out.is_error);
    /// ```
    pub fn with_user(mut self, content: impl Into<String>) -> Self {
        self.for_user = Some(content.into());
        self
    }
}

/// Trait that all tools must implement.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use clawgate::tools::{Tool, ToolContext, ToolOutput};
/// use clawgate::error::Result;
///
/// struct MyTool;
///
/// #[async_trait]
/// impl Tool for MyTool {
///     fn name(&self) -> &str { "my_tool" }
///     fn description(&self) -> &str { "Does something useful" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({"type": "object", "properties": {}, "required": []})
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
///         Ok(ToolOutput::llm_only("Done!"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the LLM uses to call the tool.
    fn name(&self) -> &str;

    /// Description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value;

    /// Execute the tool with the arguments the LLM produced.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Where a tool call originates.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// The channel name (e.g., "telegram", "web", "cli")
    pub channel: Option<String>,
    /// The chat/conversation ID within the channel
    pub chat_id: Option<String>,
    /// Session the calling turn belongs to
    pub session_key: Option<String>,
    /// True when the turn was triggered by the scheduler
    pub is_scheduled: bool,
    /// Cancelled when the turn is aborted
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel and chat ID.
    ///
    /// ```
    /// use clawgate::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new().with_channel("telegram", "123456");
    /// assert_eq!(ctx.channel.as_deref(), Some("telegram"));
    /// assert_eq!(ctx.chat_id.as_deref(), Some("123456"));
    /// ```
    pub fn with_channel(mut self, channel: &str, chat_id: &str) -> Self {
        self.channel = Some(channel.to_string());
        self.chat_id = Some(chat_id.to_string());
        self
    }

    pub fn with_session_key(mut self, key: &str) -> Self {
        self.session_key = Some(key.to_string());
        self
    }

    pub fn scheduled(mut self, is_scheduled: bool) -> Self {
        self.is_scheduled = is_scheduled;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}
