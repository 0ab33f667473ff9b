//! Message types for the Clawgate message bus
//!
//! This module defines the messages exchanged between channel adapters,
//! the scheduler, and the agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Represents an incoming message from a channel (e.g., Telegram, Feishu, web)
/// or from the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message identifier
    pub id: String,
    /// The channel this message came from (e.g., "telegram", "feishu")
    pub channel: String,
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Stable identifier of the chat/conversation thread
    pub chat_id: String,
    /// The text content of the message
    pub content: String,
    /// True when the message was injected by the scheduler rather than a user
    #[serde(default)]
    pub is_scheduled: bool,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Session key for routing (default format: "channel:chat_id")
    pub session_key: String,
    /// Additional metadata key-value pairs
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Represents an outgoing message to be sent via a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// The channel to send this message through
    pub channel: String,
    /// The chat/conversation to send to
    pub chat_id: String,
    /// The text content to send
    pub content: String,
    /// Optional message ID to reply to
    pub reply_to: Option<String>,
}

impl InboundMessage {
    /// Creates a new inbound message with the required fields.
    ///
    /// The session key is automatically generated as "channel:chat_id".
    ///
    /// # Example
    /// ```
    /// use clawgate::bus::message::InboundMessage;
    ///
    /// let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello, bot!");
    /// assert_eq!(msg.session_key, "telegram:chat456");
    /// assert!(!msg.is_scheduled);
    /// ```
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            is_scheduled: false,
            timestamp: Utc::now(),
            session_key: format!("{}:{}", channel, chat_id),
            metadata: HashMap::new(),
        }
    }

    /// Creates a message injected by the scheduler.
    ///
    /// # Example
    /// ```
    /// use clawgate::bus::message::InboundMessage;
    ///
    /// let msg = InboundMessage::scheduled("feishu", "oc_123", "daily report");
    /// assert!(msg.is_scheduled);
    /// assert_eq!(msg.sender_id, "cron");
    /// ```
    pub fn scheduled(channel: &str, chat_id: &str, content: &str) -> Self {
        let mut msg = Self::new(channel, "cron", chat_id, content);
        msg.is_scheduled = true;
        msg
    }

    /// Overrides the session key (builder pattern).
    ///
    /// # Example
    /// ```
    /// use clawgate::bus::message::InboundMessage;
    ///
    /// let msg = InboundMessage::new("web", "user", "default", "hi")
    ///     .with_session_key("web:default");
    /// assert_eq!(msg.session_key, "web:default");
    /// ```
    pub fn with_session_key(mut self, session_key: &str) -> Self {
        self.session_key = session_key.to_string();
        self
    }

    /// Adds a metadata key-value pair to the message (builder pattern).
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

impl OutboundMessage {
    /// Creates a new outbound message.
    ///
    /// # Example
    /// ```
    /// use clawgate::bus::message::OutboundMessage;
    ///
    /// let msg = OutboundMessage::new("telegram", "chat456", "Hello from the bot!");
    /// assert_eq!(msg.channel, "telegram");
    /// ```
    pub fn new(channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            reply_to: None,
        }
    }

    /// Sets the message ID to reply to (builder pattern).
    pub fn with_reply(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    /// Creates an outbound message as a response to an inbound message.
    ///
    /// # Example
    /// ```
    /// use clawgate::bus::message::{InboundMessage, OutboundMessage};
    ///
    /// let inbound = InboundMessage::new("telegram", "user123", "chat456", "Hello");
    /// let response = OutboundMessage::reply_to(&inbound, "Hello back!");
    /// assert_eq!(response.channel, "telegram");
    /// assert_eq!(response.chat_id, "chat456");
    /// assert_eq!(response.reply_to.as_deref(), Some(inbound.id.as_str()));
    /// ```
    pub fn reply_to(msg: &InboundMessage, content: &str) -> Self {
        Self::new(&msg.channel, &msg.chat_id, content).with_reply(&msg.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_ids_are_unique() {
        let a = InboundMessage::new("telegram", "u", "c", "x");
        let b = InboundMessage::new("telegram", "u", "c", "x");
        assert_ne!(a.id, b.id);
        assert_eq!(a.session_key, b.session_key);
    }

    #[test]
    fn test_inbound_metadata() {
        let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello")
            .with_metadata("message_id", "12345");
        assert_eq!(msg.metadata.get("message_id"), Some(&"12345".to_string()));
    }

    #[test]
    fn test_inbound_deserialize_defaults() {
        let json = r#"{
            "id": "m1",
            "channel": "discord",
            "sender_id": "u1",
            "chat_id": "c1",
            "content": "hey",
            "timestamp": "2026-01-01T00:00:00Z",
            "session_key": "discord:c1"
        }"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(!msg.is_scheduled);
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_scheduled_keeps_default_session_key() {
        let msg = InboundMessage::scheduled("feishu", "oc_1", "run report");
        assert_eq!(msg.session_key, "feishu:oc_1");
        assert_eq!(msg.content, "run report");
    }

    #[test]
    fn test_outbound_with_reply() {
        let msg = OutboundMessage::new("slack", "C1", "done").with_reply("m1");
        assert_eq!(msg.reply_to.as_deref(), Some("m1"));
    }
}
