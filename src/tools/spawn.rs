//! Background sub-task tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{DIRECT_CHANNEL, DIRECT_CHAT_ID};
use crate::error::{ClawgateError, Result};
use crate::subagent::SubagentManager;

use super::{Tool, ToolContext, ToolOutput};

/// Tool to hand a long-running task to a background subagent.
///
/// The result is delivered to the current chat when the subagent finishes.
pub struct SpawnTool {
    manager: Option<Arc<SubagentManager>>,
}

impl SpawnTool {
    /// `None` keeps the tool registered but makes every call fail.
    pub fn new(manager: Option<Arc<SubagentManager>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Run a long task in the background. The user gets the result in this chat when it completes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete description of the work to do"
                },
                "label": {
                    "type": "string",
                    "description": "Optional short task label"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let task = args
            .get("task")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClawgateError::Tool("task is required".into()))?;
        let label = args.get("label").and_then(|v| v.as_str());

        let manager = self
            .manager
            .as_ref()
            .ok_or_else(|| ClawgateError::Tool("Subagent manager not configured".into()))?;

        let channel = ctx.channel.as_deref().unwrap_or(DIRECT_CHANNEL);
        let chat_id = ctx.chat_id.as_deref().unwrap_or(DIRECT_CHAT_ID);

        let spawned = manager
            .spawn(task, label, channel, chat_id)
            .map_err(|e| ClawgateError::Tool(format!("failed to spawn subagent: {}", e)))?;

        Ok(ToolOutput::llm_only(format!(
            "Started background task {} ({}). The result will be sent to the user when it finishes.",
            spawned.id,
            spawned.display_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::config::Config;
    use crate::providers::registry::test_support::{model, NamedFactory};
    use crate::providers::ProviderRegistry;
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    fn manager(bus: MessageBus) -> Arc<SubagentManager> {
        let providers = ProviderRegistry::new(
            vec![model("main", "ollama/main")],
            None,
            Arc::new(NamedFactory),
        )
        .unwrap();
        Arc::new(SubagentManager::new(
            Arc::new(providers),
            Arc::new(ToolRegistry::new()),
            bus,
            Config::default(),
        ))
    }

    #[tokio::test]
    async fn test_missing_task() {
        let tool = SpawnTool::new(None);
        let err = tool
            .execute(json!({"label": "x"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("task is required"));

        let err = tool
            .execute(json!({"task": "  "}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("task is required"));
    }

    #[tokio::test]
    async fn test_without_manager() {
        let tool = SpawnTool::new(None);
        let err = tool
            .execute(json!({"task": "research"}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Subagent manager not configured"));
    }

    #[tokio::test]
    async fn test_spawn_reports_to_origin() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("telegram");
        let manager = manager(bus.clone());
        let tool = SpawnTool::new(Some(Arc::clone(&manager)));
        let ctx = ToolContext::new().with_channel("telegram", "7");

        let out = tool
            .execute(json!({"task": "research rust", "label": "rust"}), &ctx)
            .await
            .unwrap();
        assert!(out.for_llm.contains("(rust)"));
        assert!(out.for_user.is_none());

        let msg = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.chat_id, "7");
        // NamedProvider answers with the model alias.
        assert_eq!(msg.content, "[rust] main");
    }

    #[tokio::test]
    async fn test_origin_defaults_to_direct() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("cli");
        let tool = SpawnTool::new(Some(manager(bus.clone())));

        tool.execute(json!({"task": "t"}), &ToolContext::new())
            .await
            .unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.chat_id, "direct");
    }
}
