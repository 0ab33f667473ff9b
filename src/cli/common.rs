//! Shared wiring for the agent and gateway commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use clawgate::agent::AgentLoop;
use clawgate::bus::MessageBus;
use clawgate::config::Config;
use clawgate::providers::ProviderRegistry;
use clawgate::session::SessionManager;
use clawgate::subagent::SubagentManager;
use clawgate::tools::{EchoTool, MessageTool, SpawnTool, ToolRegistry};
use clawgate::utils::string::log_field;

/// Session used by `clawgate agent` when none is given.
pub const CLI_SESSION: &str = "cli:default";

/// Build the agent with its tools and subagent manager.
///
/// Subagents get the base tools minus `message`; `spawn` is registered on
/// the agent's own registry only.
pub(crate) async fn create_agent(config: Config, bus: MessageBus) -> Result<Arc<AgentLoop>> {
    let providers = Arc::new(
        ProviderRegistry::from_config(&config).with_context(|| "Invalid model_list")?,
    );
    if providers.is_empty().await {
        warn!("No models configured; add one with `clawgate models add`");
    }

    let mut base = ToolRegistry::new();
    base.register(Box::new(EchoTool));
    base.register(Box::new(MessageTool::new(bus.clone())));

    let subagents = Arc::new(SubagentManager::new(
        Arc::clone(&providers),
        Arc::new(base.without(&[])),
        bus.clone(),
        config.clone(),
    ));

    let mut tools = base;
    tools.register(Box::new(SpawnTool::new(Some(Arc::clone(&subagents)))));
    info!(tools = ?tools.names(), "Tools registered");

    let sessions = SessionManager::new().unwrap_or_else(|e| {
        warn!(
            error = %log_field("error", &e.to_string()),
            "Failed to create persistent session manager, using in-memory"
        );
        SessionManager::new_memory()
    });

    let agent = AgentLoop::new(config, sessions, providers, Arc::new(tools), bus)
        .with_subagents(subagents);
    Ok(Arc::new(agent))
}
