//! Clawgate - personal AI agent gateway
//!
//! Chat channels publish to a [`MessageBus`]; the [`AgentLoop`] answers each
//! session in order, calling models through a failover chain and running
//! tools, including background subagents.

pub mod agent;
pub mod bus;
pub mod channels;
pub mod config;
pub mod cron;
pub mod error;
pub mod providers;
pub mod session;
pub mod subagent;
pub mod tools;
pub mod utils;
pub mod web;

pub use agent::AgentLoop;
pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use config::Config;
pub use error::{ClawgateError, Result};
pub use providers::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ProviderRegistry, ToolDefinition, Usage,
};
pub use session::{Message, Role, Session, SessionManager, ToolCall};
pub use subagent::{SubagentManager, SubagentStatus, SubagentTask};
