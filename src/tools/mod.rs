//! Tools module - what the agent can do besides talking
//!
//! Built-in tools:
//! - [`EchoTool`]: returns its `message` argument
//! - [`message::MessageTool`]: sends a message to a chat through the bus
//! - [`spawn::SpawnTool`]: hands a task to a background subagent

pub mod message;
mod registry;
pub mod spawn;
mod types;

pub use message::MessageTool;
pub use registry::ToolRegistry;
pub use spawn::SpawnTool;
pub use types::{Tool, ToolContext, ToolOutput};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided message"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        Ok(ToolOutput::llm_only(message))
    }
}
