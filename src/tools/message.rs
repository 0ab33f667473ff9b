//! Message tool for proactive outbound messages.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::{MessageBus, OutboundMessage};
use crate::error::{ClawgateError, Result};

use super::{Tool, ToolContext, ToolOutput};

/// Sends a message to the current chat, or to an explicit channel and chat.
pub struct MessageTool {
    bus: MessageBus,
}

impl MessageTool {
    pub fn new(bus: MessageBus) -> Self {
        Self { bus }
    }
}

fn non_empty_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user now, before the final answer. \
         Omit channel and chat_id to reply in the current conversation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "Message text to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Destination channel name. Defaults to the current channel."
                },
                "chat_id": {
                    "type": "string",
                    "description": "Destination chat ID. Defaults to the current chat."
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let content = non_empty_arg(&args, "content")
            .ok_or_else(|| ClawgateError::Tool("Missing 'content' parameter".to_string()))?;

        let channel = non_empty_arg(&args, "channel")
            .or_else(|| ctx.channel.clone())
            .ok_or_else(|| ClawgateError::Tool("No target channel specified".to_string()))?;

        let chat_id = non_empty_arg(&args, "chat_id")
            .or_else(|| ctx.chat_id.clone())
            .ok_or_else(|| ClawgateError::Tool("No target chat_id specified".to_string()))?;

        self.bus
            .publish_outbound(OutboundMessage::new(&channel, &chat_id, &content));

        Ok(ToolOutput::llm_only(format!(
            "Message sent to {}:{}",
            channel, chat_id
        )))
    }
}
