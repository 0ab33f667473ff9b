//! Integration tests for Clawgate
//!
//! These tests verify that the components work together: the message flow
//! through the bus, provider failover inside a turn, tool execution, session
//! persistence, and configuration handling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use clawgate::{
    agent::AgentLoop,
    bus::{InboundMessage, MessageBus, OutboundMessage},
    config::{Config, ModelConfig},
    error::{ClawgateError, Result},
    providers::{
        ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ProviderFactory, ProviderRegistry,
        ToolDefinition,
    },
    session::{Message, Role, SessionManager},
    tools::{EchoTool, Tool, ToolContext, ToolRegistry},
};

// ============================================================================
// Mock Provider
// ============================================================================

/// Behaves according to the alias of the model it was created for:
///
/// - `broken`: fails with "model not found"
/// - `tooling`: asks for `echo` once, then answers with the tool result
/// - `slow`: waits 100ms, then answers like the default
/// - anything else: answers `reply: <last user message>`
struct AliasProvider {
    alias: String,
}

fn last_user(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[async_trait]
impl LLMProvider for AliasProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _model: Option<&str>,
        _options: ChatOptions,
    ) -> Result<LLMResponse> {
        match self.alias.as_str() {
            "broken" => Err(ClawgateError::Provider(
                "404 model not found: the model does not exist".into(),
            )),
            "tooling" => match messages.last() {
                Some(last) if last.is_tool_result() => {
                    Ok(LLMResponse::text(&format!("tool said: {}", last.content)))
                }
                _ => Ok(LLMResponse::with_tools(
                    "",
                    vec![LLMToolCall::new(
                        "call_1",
                        "echo",
                        r#"{"message": "ping"}"#,
                    )],
                )),
            },
            "slow" => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(LLMResponse::text(&format!("reply: {}", last_user(&messages))))
            }
            _ => Ok(LLMResponse::text(&format!("reply: {}", last_user(&messages)))),
        }
    }

    fn default_model(&self) -> &str {
        &self.alias
    }

    fn name(&self) -> &str {
        "alias"
    }
}

struct AliasFactory;

impl ProviderFactory for AliasFactory {
    fn create(&self, model: &ModelConfig) -> Result<Arc<dyn LLMProvider>> {
        Ok(Arc::new(AliasProvider {
            alias: model.model_name.clone(),
        }))
    }
}

fn model(alias: &str) -> ModelConfig {
    ModelConfig::new(alias, "openai/gpt-4o-mini").with_api_key("sk-test")
}

fn agent_with(models: &[&str], sessions: SessionManager, bus: MessageBus) -> AgentLoop {
    let providers = ProviderRegistry::new(
        models.iter().map(|m| model(m)).collect(),
        None,
        Arc::new(AliasFactory),
    )
    .unwrap();
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(EchoTool));
    AgentLoop::new(
        Config::default(),
        sessions,
        Arc::new(providers),
        Arc::new(tools),
        bus,
    )
}

// ============================================================================
// Message Bus Integration Tests
// ============================================================================

#[tokio::test]
async fn test_message_bus_roundtrip() {
    let bus = MessageBus::new();

    // Simulate a message from a channel
    let inbound = InboundMessage::new("telegram", "user123", "chat456", "Hello bot!");
    bus.publish_inbound(inbound).unwrap();

    // Agent receives the message
    let received = bus.consume_inbound().await.unwrap();
    assert_eq!(received.content, "Hello bot!");
    assert_eq!(received.session_key, "telegram:chat456");

    // Agent sends a response; the channel subscribes afterwards
    bus.publish_outbound(OutboundMessage::reply_to(&received, "Hello human!"));
    let mut outgoing = bus.subscribe("telegram");
    let msg = outgoing.recv().await.unwrap();
    assert_eq!(msg.content, "Hello human!");
    assert_eq!(msg.chat_id, "chat456");
}

#[tokio::test]
async fn test_outbound_is_routed_per_channel() {
    let bus = MessageBus::new();
    let mut telegram = bus.subscribe("telegram");
    let mut webhook = bus.subscribe("webhook");

    bus.publish_outbound(OutboundMessage::new("webhook", "a", "for webhook"));
    bus.publish_outbound(OutboundMessage::new("telegram", "b", "for telegram"));

    assert_eq!(telegram.recv().await.unwrap().content, "for telegram");
    assert_eq!(webhook.recv().await.unwrap().content, "for webhook");
}

#[tokio::test]
async fn test_concurrent_message_producers() {
    let bus = MessageBus::new();
    let mut handles = vec![];

    for channel in ["telegram", "webhook", "cli"] {
        let bus = bus.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..5 {
                let msg =
                    InboundMessage::new(channel, "user", "chat", &format!("{}:{}", channel, i));
                bus.publish_inbound(msg).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut received = 0;
    while received < 15 {
        tokio::time::timeout(Duration::from_secs(1), bus.consume_inbound())
            .await
            .unwrap()
            .unwrap();
        received += 1;
    }
}

// ============================================================================
// Agent Integration Tests
// ============================================================================

#[tokio::test]
async fn test_failover_skips_missing_model() {
    let agent = agent_with(
        &["broken", "backup"],
        SessionManager::new_memory(),
        MessageBus::new(),
    );
    let reply = agent.process_direct("hello", "cli:test").await.unwrap();
    assert_eq!(reply, "reply: hello");
}

#[tokio::test]
async fn test_all_models_failing_surfaces_error() {
    let agent = agent_with(&["broken"], SessionManager::new_memory(), MessageBus::new());
    let err = agent.process_direct("hello", "cli:test").await.unwrap_err();
    assert!(err.to_string().contains("model not found"));
}

#[tokio::test]
async fn test_tool_round_trip() {
    let agent = agent_with(&["tooling"], SessionManager::new_memory(), MessageBus::new());
    let reply = agent.process_direct("use a tool", "cli:tools").await.unwrap();
    assert_eq!(reply, "tool said: ping");

    let session = agent.sessions().get("cli:tools").await.unwrap().unwrap();
    assert!(session.messages.iter().any(|m| m.has_tool_calls()));
    assert!(session.messages.iter().any(|m| m.is_tool_result()));
    assert_eq!(session.last_message().unwrap().content, "tool said: ping");
}

#[tokio::test]
async fn test_inbound_reply_is_published_to_origin_channel() {
    let bus = MessageBus::new();
    let agent = agent_with(&["main"], SessionManager::new_memory(), bus.clone());
    let mut telegram = bus.subscribe("telegram");

    let msg = InboundMessage::new("telegram", "u1", "42", "what's up");
    let reply = agent.process_inbound(&msg).await.unwrap();
    assert_eq!(reply, "reply: what's up");

    let out = telegram.recv().await.unwrap();
    assert_eq!(out.chat_id, "42");
    assert_eq!(out.content, "reply: what's up");
}

#[tokio::test]
async fn test_running_loop_keeps_session_order() {
    let bus = MessageBus::new();
    let agent = Arc::new(agent_with(&["main"], SessionManager::new_memory(), bus.clone()));
    let mut replies = bus.subscribe("webhook");

    let runner = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.start().await })
    };

    for text in ["one", "two", "three"] {
        bus.publish_inbound(InboundMessage::new("webhook", "ci", "builds", text))
            .unwrap();
    }

    for expected in ["reply: one", "reply: two", "reply: three"] {
        let out = tokio::time::timeout(Duration::from_secs(5), replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.content, expected);
    }

    agent.stop();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_direct_turns_on_one_session_do_not_interleave() {
    let agent = Arc::new(agent_with(
        &["slow"],
        SessionManager::new_memory(),
        MessageBus::new(),
    ));

    let first = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.process_direct("one", "cli:shared").await })
    };
    // Let the first turn take the session before the second arrives.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(agent.is_session_busy("cli:shared"));
    let second = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.process_direct("two", "cli:shared").await })
    };

    assert_eq!(first.await.unwrap().unwrap(), "reply: one");
    assert_eq!(second.await.unwrap().unwrap(), "reply: two");

    let session = agent.sessions().get("cli:shared").await.unwrap().unwrap();
    let history: Vec<(Role, &str)> = session
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        history,
        vec![
            (Role::User, "one"),
            (Role::Assistant, "reply: one"),
            (Role::User, "two"),
            (Role::Assistant, "reply: two"),
        ]
    );
}

// ============================================================================
// Tool Integration Tests
// ============================================================================

#[tokio::test]
async fn test_tool_registry_executes_with_context() {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool));
    assert!(registry.has("echo"));
    assert_eq!(registry.definitions().len(), 1);

    let ctx = ToolContext::new().with_channel("cli", "direct");
    let out = EchoTool
        .execute(serde_json::json!({"message": "hi"}), &ctx)
        .await
        .unwrap();
    assert_eq!(out.for_llm, "hi");
}

// ============================================================================
// Session Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_sessions_survive_restart() {
    let dir = tempdir().unwrap();
    {
        let sessions = SessionManager::with_path(dir.path().to_path_buf()).unwrap();
        let agent = agent_with(&["main"], sessions, MessageBus::new());
        agent.process_direct("remember me", "cli:persist").await.unwrap();
    }

    let sessions = SessionManager::with_path(dir.path().to_path_buf()).unwrap();
    assert_eq!(sessions.list().await.unwrap(), vec!["cli:persist"]);
    let session = sessions.get("cli:persist").await.unwrap().unwrap();
    assert_eq!(session.messages[0].content, "remember me");
    assert_eq!(session.messages[1].content, "reply: remember me");
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_config_roundtrip_and_registry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut config = Config::default();
    config.model_list = vec![
        ModelConfig::new("fast", "groq/llama-3.1-8b-instant").with_api_key("gsk-1"),
        ModelConfig::new("local", "ollama/llama3"),
    ];
    config.agents.defaults.model_name = "local".into();
    config.save_to_path(&path).unwrap();

    let loaded = Config::load_from_path(&path).unwrap();
    assert!(loaded.validate().is_ok());
    assert_eq!(loaded.default_model_name(), Some("local"));
    assert!(ProviderRegistry::from_config(&loaded).is_ok());
}

#[test]
fn test_invalid_model_list_is_rejected() {
    let mut config = Config::default();
    config.model_list = vec![ModelConfig::new("a", "openai/gpt-4o")];
    assert!(config.validate().is_err());
    assert!(matches!(
        ProviderRegistry::from_config(&config),
        Err(ClawgateError::Config(_))
    ));
}
