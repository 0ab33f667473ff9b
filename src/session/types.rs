//! Session types for Clawgate
//!
//! Conversation sessions, messages, roles and tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation session: ordered history plus per-session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session (e.g., "telegram:chat123")
    pub key: String,
    /// Ordered list of messages in this conversation
    pub messages: Vec<Message>,
    /// Digest of messages that fell out of the history window
    #[serde(default)]
    pub summary: Option<String>,
    /// Model alias used instead of the default for this session
    #[serde(default)]
    pub model_override: Option<String>,
    /// When this session was created
    pub created_at: DateTime<Utc>,
    /// When this session was last modified
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the given key.
    ///
    /// # Example
    /// ```
    /// use clawgate::session::Session;
    ///
    /// let session = Session::new("telegram:chat123");
    /// assert!(session.is_empty());
    /// assert!(session.model_override.is_none());
    /// ```
    pub fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            messages: Vec::new(),
            summary: None,
            model_override: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and bump `updated_at`.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Clear all messages and the summary.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.summary = None;
        self.updated_at = Utc::now();
    }

    pub fn set_summary(&mut self, summary: &str) {
        self.summary = Some(summary.to_string());
        self.updated_at = Utc::now();
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender
    pub role: Role,
    /// The text content of the message
    pub content: String,
    /// Tool calls made by the assistant (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (for tool results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    ///
    /// # Example
    /// ```
    /// use clawgate::session::{Message, Role};
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: &str) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: &str) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result answering `tool_call_id`.
    ///
    /// # Example
    /// ```
    /// use clawgate::session::{Message, Role};
    ///
    /// let msg = Message::tool_result("call_123", "done");
    /// assert_eq!(msg.role, Role::Tool);
    /// assert!(msg.is_tool_result());
    /// ```
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.to_string());
        msg
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = Some(tool_calls);
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|tc| !tc.is_empty())
            .unwrap_or(false)
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call recorded in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}
