//! Agent loop implementation
//!
//! Drives one conversational turn to completion: build context, call the
//! model chain, run requested tools, repeat until the model answers in
//! plain text or the iteration cap is hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::config::Config;
use crate::error::{ClawgateError, Result};
use crate::providers::{
    classify_error_message, invoke_with_failover, ChatOptions, FailoverPolicy, ModelEntry,
    ProviderRegistry,
};
use crate::session::{Message, Session, SessionManager, ToolCall};
use crate::subagent::SubagentManager;
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};
use crate::utils::string::log_field;

use super::compaction::apply_history_window;
use super::context::{ContextBuilder, RuntimeContext};
use super::suppression::should_suppress_scheduled_error;

/// Final text of a turn aborted by cancellation or shutdown.
pub const CANCELLED_NOTICE: &str = "Request cancelled.";

/// Default channel and chat for direct (CLI) turns.
pub const DIRECT_CHANNEL: &str = "cli";
pub const DIRECT_CHAT_ID: &str = "direct";

/// Phases of a turn, traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    ContextBuilt,
    AwaitingProvider,
    ToolCallPending,
    ToolExecuting,
    Finalized,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnState::ContextBuilt => "context_built",
            TurnState::AwaitingProvider => "awaiting_provider",
            TurnState::ToolCallPending => "tool_call_pending",
            TurnState::ToolExecuting => "tool_executing",
            TurnState::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// Everything one turn needs to know about where it came from.
struct TurnRequest<'a> {
    session_key: &'a str,
    content: &'a str,
    channel: &'a str,
    chat_id: &'a str,
    is_scheduled: bool,
    /// Publish the final text (and `for_user` tool texts) to the bus.
    publish: bool,
    cancel: Option<CancellationToken>,
}

/// The agent loop.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use clawgate::agent::AgentLoop;
/// use clawgate::bus::MessageBus;
/// use clawgate::config::Config;
/// use clawgate::providers::ProviderRegistry;
/// use clawgate::session::SessionManager;
/// use clawgate::tools::{EchoTool, ToolRegistry};
///
/// let config = Config::load()?;
/// let providers = Arc::new(ProviderRegistry::from_config(&config)?);
/// let mut tools = ToolRegistry::new();
/// tools.register(Box::new(EchoTool));
///
/// let agent = Arc::new(AgentLoop::new(
///     config,
///     SessionManager::new()?,
///     providers,
///     Arc::new(tools),
///     MessageBus::new(),
/// ));
/// let reply = agent.process_direct("Hello", "cli:direct").await?;
/// ```
pub struct AgentLoop {
    config: Config,
    sessions: SessionManager,
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    bus: MessageBus,
    context_builder: ContextBuilder,
    subagents: Option<Arc<SubagentManager>>,
    failover: FailoverPolicy,
    running: AtomicBool,
    shutdown: std::sync::Mutex<CancellationToken>,
    /// Per-session turn locks; tokio mutexes queue waiters in FIFO order.
    session_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLoop {
    pub fn new(
        config: Config,
        sessions: SessionManager,
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        bus: MessageBus,
    ) -> Self {
        let mut context_builder = ContextBuilder::new();
        if let Some(prompt) = config.agents.defaults.system_prompt.as_deref() {
            context_builder = context_builder.with_system_prompt(prompt);
        }
        let failover = FailoverPolicy::default()
            .with_provider_max_tokens(config.agents.defaults.provider_max_tokens);

        Self {
            config,
            sessions,
            providers,
            tools,
            bus,
            context_builder,
            subagents: None,
            failover,
            running: AtomicBool::new(false),
            shutdown: std::sync::Mutex::new(CancellationToken::new()),
            session_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    /// Attach the subagent manager so `stop()` also cancels background tasks.
    pub fn with_subagents(mut self, subagents: Arc<SubagentManager>) -> Self {
        self.subagents = Some(subagents);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn subagents(&self) -> Option<&Arc<SubagentManager>> {
        self.subagents.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn shutdown_token(&self) -> CancellationToken {
        match self.shutdown.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn session_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = match self.session_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// True while a turn for `session_key` is in flight.
    pub fn is_session_busy(&self, session_key: &str) -> bool {
        let locks = match self.session_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .get(session_key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Run one turn and publish the reply to `(channel, chat_id)`.
    pub async fn process_turn(
        &self,
        session_key: &str,
        content: &str,
        channel: &str,
        chat_id: &str,
    ) -> Result<String> {
        self.run_turn(TurnRequest {
            session_key,
            content,
            channel,
            chat_id,
            is_scheduled: false,
            publish: true,
            cancel: None,
        })
        .await
    }

    /// Run the turn for an inbound bus message and publish the reply.
    pub async fn process_inbound(&self, msg: &InboundMessage) -> Result<String> {
        self.process_inbound_with_cancel(msg, None).await
    }

    pub async fn process_inbound_with_cancel(
        &self,
        msg: &InboundMessage,
        cancel: Option<CancellationToken>,
    ) -> Result<String> {
        self.run_turn(TurnRequest {
            session_key: &msg.session_key,
            content: &msg.content,
            channel: &msg.channel,
            chat_id: &msg.chat_id,
            is_scheduled: msg.is_scheduled,
            publish: true,
            cancel,
        })
        .await
    }

    /// Run one turn and return the reply without publishing it.
    pub async fn process_direct_with_channel(
        &self,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
    ) -> Result<String> {
        self.process_direct_with_channel_cancel(content, session_key, channel, chat_id, None)
            .await
    }

    pub async fn process_direct_with_channel_cancel(
        &self,
        content: &str,
        session_key: &str,
        channel: &str,
        chat_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<String> {
        self.run_turn(TurnRequest {
            session_key,
            content,
            channel,
            chat_id,
            is_scheduled: false,
            publish: false,
            cancel,
        })
        .await
    }

    /// [`process_direct_with_channel`](Self::process_direct_with_channel) on `cli`/`direct`.
    pub async fn process_direct(&self, content: &str, session_key: &str) -> Result<String> {
        self.process_direct_with_channel(content, session_key, DIRECT_CHANNEL, DIRECT_CHAT_ID)
            .await
    }

    pub async fn process_direct_with_cancel(
        &self,
        content: &str,
        session_key: &str,
        cancel: CancellationToken,
    ) -> Result<String> {
        self.process_direct_with_channel_cancel(
            content,
            session_key,
            DIRECT_CHANNEL,
            DIRECT_CHAT_ID,
            Some(cancel),
        )
        .await
    }

    /// Model chain for a session, ignoring a pin to a model that was removed.
    async fn chain_for(&self, session: &Session) -> Result<Vec<ModelEntry>> {
        match self.providers.chain(session.model_override.as_deref()).await {
            Err(ClawgateError::NotFound(what)) if session.model_override.is_some() => {
                warn!(
                    session_key = %session.key,
                    missing = %what,
                    "Session model override no longer configured, using default"
                );
                self.providers.chain(None).await
            }
            other => other,
        }
    }

    async fn run_turn(&self, req: TurnRequest<'_>) -> Result<String> {
        let lock = self.session_lock(req.session_key);
        let _turn_guard = lock.lock().await;

        let shutdown = self.shutdown_token();
        let turn_cancel = req
            .cancel
            .as_ref()
            .map(|t| t.child_token())
            .unwrap_or_default();
        let cancelled = || {
            let turn_cancel = turn_cancel.clone();
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = turn_cancel.cancelled() => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        };

        let defaults = &self.config.agents.defaults;
        let mut session = self.sessions.get_or_create(req.session_key).await?;
        session.add_message(Message::user(req.content));

        let chain = match self.chain_for(&session).await {
            Ok(chain) => chain,
            Err(e) => {
                self.sessions.save(&session).await?;
                return Err(e);
            }
        };

        let tool_definitions = self.tools.definitions();
        let builder = self.context_builder.clone().with_runtime_context(
            RuntimeContext::new()
                .with_channel(req.channel)
                .with_tools(self.tools.names().iter().map(|s| s.to_string()).collect())
                .with_scheduled(req.is_scheduled)
                .with_current_time(),
        );
        let options = ChatOptions::new()
            .with_max_tokens(defaults.max_tokens)
            .with_temperature(defaults.temperature);
        let tool_ctx = ToolContext::new()
            .with_channel(req.channel, req.chat_id)
            .with_session_key(req.session_key)
            .scheduled(req.is_scheduled)
            .with_cancel(turn_cancel.clone());

        let max_iterations = defaults.max_tool_iterations;
        let mut iteration = 0u32;
        let mut last_assistant_text = String::new();
        let mut last_suppressed = false;

        let final_text = 'turn: loop {
            let window = apply_history_window(&session.messages, defaults.history_window);
            session.summary = window.summary.clone();
            let messages = builder.build_messages(window.summary.as_deref(), window.kept);
            debug!(state = %TurnState::ContextBuilt, messages = messages.len(), iteration);

            debug!(state = %TurnState::AwaitingProvider);
            let call = invoke_with_failover(
                &chain,
                messages,
                tool_definitions.clone(),
                options.clone(),
                &self.failover,
            );
            let outcome = tokio::select! {
                _ = cancelled() => None,
                result = call => Some(result),
            };
            let served = match outcome {
                None => break 'turn CANCELLED_NOTICE.to_string(),
                Some(Ok(served)) => served,
                Some(Err(e)) => {
                    error!(error = %log_field("error", &e.to_string()), "Model chain exhausted");
                    self.sessions.save(&session).await?;
                    return Err(e);
                }
            };
            let response = served.response;
            debug!(model_name = %served.model_name, attempts = served.attempts, "Provider answered");

            if !response.content.trim().is_empty() {
                last_assistant_text = response.content.clone();
            }
            if !response.has_tool_calls() {
                break 'turn response.content;
            }

            if iteration >= max_iterations {
                warn!(
                    iterations = iteration,
                    "Tool loop reached maximum iterations, finalizing"
                );
                break 'turn if last_assistant_text.trim().is_empty() {
                    format!(
                        "I stopped after {} tool steps without finishing. Please try a narrower request.",
                        max_iterations
                    )
                } else {
                    last_assistant_text.clone()
                };
            }
            iteration += 1;

            debug!(state = %TurnState::ToolCallPending, calls = response.tool_calls.len());
            let calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|tc| ToolCall::new(&tc.id, &tc.name, &tc.arguments))
                .collect();
            session.add_message(Message::assistant_with_tools(&response.content, calls));

            for (index, call) in response.tool_calls.iter().enumerate() {
                let args: serde_json::Value = match serde_json::from_str(&call.arguments) {
                    Ok(v) => v,
                    Err(e) if call.arguments.trim().is_empty() => {
                        debug!(
                            tool = %call.name,
                            error = %log_field("error", &e.to_string()),
                            "Empty tool arguments"
                        );
                        serde_json::json!({})
                    }
                    Err(e) => {
                        warn!(
                            tool = %call.name,
                            error = %log_field("error", &e.to_string()),
                            "Invalid JSON in tool arguments"
                        );
                        session.add_message(Message::tool_result(
                            &call.id,
                            &format!("Invalid arguments JSON: {}", e),
                        ));
                        continue;
                    }
                };

                debug!(state = %TurnState::ToolExecuting, tool = %call.name, id = %call.id);
                let execution = self.tools.execute_with_context(&call.name, args, &tool_ctx);
                let output = tokio::select! {
                    _ = cancelled() => None,
                    out = execution => Some(out),
                };
                let Some(output) = output else {
                    for pending in &response.tool_calls[index..] {
                        session.add_message(Message::tool_result(&pending.id, CANCELLED_NOTICE));
                    }
                    break 'turn CANCELLED_NOTICE.to_string();
                };

                let suppressed =
                    req.is_scheduled && should_suppress_scheduled_error(req.channel, Some(&output));
                last_suppressed = suppressed;
                if suppressed {
                    info!(tool = %call.name, "Suppressed scheduled tool error");
                } else {
                    self.publish_for_user(&req, &output);
                }
                session.add_message(Message::tool_result(&call.id, &output.for_llm));
            }
        };

        let cancelled_turn = final_text == CANCELLED_NOTICE
            && (turn_cancel.is_cancelled() || shutdown.is_cancelled());
        if cancelled_turn {
            info!(session_key = %req.session_key, "Turn cancelled");
        }

        session.add_message(Message::assistant(&final_text));
        self.sessions.save(&session).await?;
        debug!(state = %TurnState::Finalized, iterations = iteration);

        let suppress_final = req.is_scheduled && last_suppressed && !cancelled_turn;
        if req.publish && !final_text.trim().is_empty() && !suppress_final {
            self.bus
                .publish_outbound(OutboundMessage::new(req.channel, req.chat_id, &final_text));
        } else if suppress_final {
            info!(session_key = %req.session_key, "Suppressed scheduled turn reply");
        }

        Ok(final_text)
    }

    fn publish_for_user(&self, req: &TurnRequest<'_>, output: &ToolOutput) {
        if !req.publish {
            return;
        }
        if let Some(text) = output.for_user.as_deref().filter(|t| !t.trim().is_empty()) {
            self.bus
                .publish_outbound(OutboundMessage::new(req.channel, req.chat_id, text));
        }
    }

    /// Process one bus message, turning a failed turn into a user notice.
    async fn handle_inbound(&self, msg: InboundMessage) {
        let span = info_span!(
            "request",
            request_id = %msg.id,
            session_key = %msg.session_key,
            channel = %msg.channel,
        );
        async {
            info!(
                scheduled = msg.is_scheduled,
                content = %log_field("content", &msg.content),
                "Processing message"
            );
            let start = std::time::Instant::now();
            match self.process_inbound(&msg).await {
                Ok(response) => info!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    response_len = response.len(),
                    "Request completed"
                ),
                Err(e) => {
                    let text = e.to_string();
                    let class = classify_error_message(&text);
                    error!(
                        latency_ms = start.elapsed().as_millis() as u64,
                        class = %class,
                        error = %log_field("error", &text),
                        "Request failed"
                    );
                    self.bus.publish_outbound(OutboundMessage::reply_to(
                        &msg,
                        class.user_message(),
                    ));
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Consume the bus inbound queue until [`stop`](Self::stop).
    ///
    /// Each session gets its own worker so sessions run concurrently while
    /// messages of one session are handled in the order they were published.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ClawgateError::Config("Agent loop already running".into()));
        }

        let shutdown = {
            let mut guard = match self.shutdown.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };
        info!("Starting agent loop");

        let mut workers: HashMap<String, mpsc::UnboundedSender<InboundMessage>> = HashMap::new();

        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Received shutdown signal");
                    break;
                }
                msg = self.bus.consume_inbound() => msg,
            };
            let Some(msg) = msg else {
                info!("Inbound queue closed");
                break;
            };

            workers.retain(|_, tx| !tx.is_closed());
            let key = msg.session_key.clone();
            let tx = workers.entry(key.clone()).or_insert_with(|| {
                let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
                let agent = Arc::clone(self);
                let worker_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!(session_key = %key, "Session worker started");
                    loop {
                        let next = tokio::select! {
                            _ = worker_shutdown.cancelled() => None,
                            next = rx.recv() => next,
                        };
                        match next {
                            Some(msg) => agent.handle_inbound(msg).await,
                            None => break,
                        }
                    }
                    debug!(session_key = %key, "Session worker stopped");
                });
                tx
            });
            if let Err(mpsc::error::SendError(msg)) = tx.send(msg) {
                warn!(session_key = %msg.session_key, "Session worker gone, message dropped");
            }
        }

        drop(workers);
        self.running.store(false, Ordering::SeqCst);
        info!("Agent loop stopped");
        Ok(())
    }

    /// Stop consuming, cancel in-flight turns and background subagents.
    pub fn stop(&self) {
        info!("Stopping agent loop");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_token().cancel();
        if let Some(subagents) = &self.subagents {
            subagents.cancel_all();
        }
    }
}
