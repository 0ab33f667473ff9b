//! Context builder for agent conversations
//!
//! Builds the system message and the message list sent to the provider.

use crate::session::Message;

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Clawgate, a personal AI assistant reachable from many chat platforms.

You have access to tools to help accomplish tasks. Use them when needed.
For long-running work, use the spawn tool and tell the user you will report back.

Be concise but helpful."#;

/// Runtime facts appended to the system prompt.
///
/// ```rust
/// use clawgate::agent::RuntimeContext;
///
/// let ctx = RuntimeContext::new()
///     .with_channel("telegram")
///     .with_tools(vec!["echo".to_string(), "spawn".to_string()]);
/// let rendered = ctx.render().unwrap();
/// assert!(rendered.contains("Channel: telegram"));
/// assert!(rendered.contains("echo, spawn"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub channel: Option<String>,
    pub available_tools: Vec<String>,
    pub current_time: Option<String>,
    pub scheduled: bool,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }

    pub fn with_current_time(mut self) -> Self {
        self.current_time = Some(chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string());
        self
    }

    pub fn with_scheduled(mut self, scheduled: bool) -> Self {
        self.scheduled = scheduled;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_none()
            && self.available_tools.is_empty()
            && self.current_time.is_none()
            && !self.scheduled
    }

    /// Render as a `## Runtime Context` section, or `None` when empty.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut out = String::from("## Runtime Context\n");
        if let Some(ref channel) = self.channel {
            out.push_str(&format!("\n- Channel: {}", channel));
        }
        if let Some(ref time) = self.current_time {
            out.push_str(&format!("\n- Current time: {}", time));
        }
        if !self.available_tools.is_empty() {
            out.push_str(&format!(
                "\n- Available tools: {}",
                self.available_tools.join(", ")
            ));
        }
        if self.scheduled {
            out.push_str("\n- This request was triggered by a scheduled job, not typed by the user.");
        }
        Some(out)
    }
}

/// Assembles `[system, history...]` for a provider call.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
    runtime_context: Option<RuntimeContext>,
}

impl ContextBuilder {
    /// ```rust
    /// use clawgate::agent::ContextBuilder;
    ///
    /// let system = ContextBuilder::new().build_system_message(None);
    /// assert!(system.content.contains("Clawgate"));
    /// ```
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            runtime_context: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Ignored when `ctx` is empty.
    pub fn with_runtime_context(mut self, ctx: RuntimeContext) -> Self {
        if !ctx.is_empty() {
            self.runtime_context = Some(ctx);
        }
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// System message, with the digest of omitted history when there is one.
    pub fn build_system_message(&self, summary: Option<&str>) -> Message {
        let mut content = self.system_prompt.clone();
        if let Some(rendered) = self.runtime_context.as_ref().and_then(|c| c.render()) {
            content.push_str("\n\n");
            content.push_str(&rendered);
        }
        if let Some(summary) = summary.filter(|s| !s.is_empty()) {
            content.push_str("\n\n## Earlier Conversation\n\n");
            content.push_str(summary);
        }
        Message::system(&content)
    }

    /// Prepend the system message to an already windowed history.
    ///
    /// ```rust
    /// use clawgate::agent::ContextBuilder;
    /// use clawgate::session::{Message, Role};
    ///
    /// let history = vec![Message::user("Hello"), Message::assistant("Hi!")];
    /// let messages = ContextBuilder::new().build_messages(None, history);
    /// assert_eq!(messages.len(), 3);
    /// assert_eq!(messages[0].role, Role::System);
    /// ```
    pub fn build_messages(&self, summary: Option<&str>, history: Vec<Message>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(self.build_system_message(summary));
        messages.extend(history);
        messages
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
