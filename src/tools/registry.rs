//! Tool registry for Clawgate
//!
//! Tools are registered once at startup; the agent loop then holds the
//! registry behind an `Arc` and only reads from it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use crate::providers::ToolDefinition;
use crate::utils::string::log_field;

use super::{Tool, ToolContext, ToolOutput};

/// A registry of tools keyed by name.
///
/// # Example
///
/// ```rust
/// use clawgate::tools::{EchoTool, ToolContext, ToolRegistry};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(EchoTool));
/// assert!(registry.has("echo"));
///
/// let out = registry
///     .execute_with_context("echo", json!({"message": "hello"}), &ToolContext::new())
///     .await;
/// assert_eq!(out.for_llm, "hello");
/// # });
/// ```
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.register_arc(Arc::from(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Copy of this registry without the named tools.
    ///
    /// Tools are shared, not cloned.
    pub fn without(&self, names: &[&str]) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|(name, _)| !names.contains(&name.as_str()))
                .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Execute a tool by name.
    ///
    /// Never fails: an unknown tool or a tool error becomes
    /// [`ToolOutput::error`], so the LLM always gets a result to react to.
    pub async fn execute_with_context(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> ToolOutput {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "Unknown tool requested");
            return ToolOutput::error(format!("Tool not found: {}", name));
        };

        let start = Instant::now();
        match tool.execute(args, ctx).await {
            Ok(output) => {
                info!(
                    tool = name,
                    is_error = output.is_error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool executed"
                );
                output
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    tool = name,
                    error = %log_field("error", &message),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Tool execution failed"
                );
                ToolOutput::error(message)
            }
        }
    }

    /// Tool definitions for the provider, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClawgateError, Result};
    use crate::tools::EchoTool;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            Err(ClawgateError::Tool("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_output() {
        let registry = ToolRegistry::new();
        let out = registry
            .execute_with_context("nope", json!({}), &ToolContext::new())
            .await;
        assert!(out.is_error);
        assert_eq!(out.for_llm, "Tool not found: nope");
    }

    #[tokio::test]
    async fn test_tool_err_becomes_error_output() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(FailingTool));
        let out = registry
            .execute_with_context("fail", json!({}), &ToolContext::new())
            .await;
        assert!(out.is_error);
        assert!(out.for_llm.contains("disk on fire"));
    }

    #[test]
    fn test_definitions_and_names_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(FailingTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.names(), vec!["echo", "fail"]);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn test_without_filters_and_shares() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(FailingTool));
        let reduced = registry.without(&["fail"]);
        assert!(reduced.has("echo"));
        assert!(!reduced.has("fail"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }
}
