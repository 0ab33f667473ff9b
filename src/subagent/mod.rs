//! Subagent module - background agent executions
//!
//! A subagent is an isolated [`AgentLoop`] turn run on its own tokio task.
//! [`SubagentManager::spawn`] records a [`SubagentTask`], starts the
//! execution and returns at once. When the execution ends the task moves to
//! `completed` or `failed` exactly once and a single message is published to
//! the chat the task came from.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::{AgentLoop, ContextBuilder, CANCELLED_NOTICE};
use crate::bus::{MessageBus, OutboundMessage};
use crate::config::Config;
use crate::error::{ClawgateError, Result};
use crate::providers::ProviderRegistry;
use crate::session::SessionManager;
use crate::tools::ToolRegistry;
use crate::utils::string::log_field;

/// Tools a subagent never gets. Its only way to reach the origin chat is
/// the single completion notice.
const EXCLUDED_TOOLS: &[&str] = &["spawn", "message"];

const SUBAGENT_PROMPT: &str = "You are a background worker for a personal assistant. \
Complete the task you are given on your own and reply with the result only. \
Nobody will answer follow-up questions.";

/// Lifecycle of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubagentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubagentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubagentStatus::Completed | SubagentStatus::Failed)
    }
}

impl fmt::Display for SubagentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubagentStatus::Pending => "pending",
            SubagentStatus::Running => "running",
            SubagentStatus::Completed => "completed",
            SubagentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Record of one background task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentTask {
    pub id: String,
    pub task: String,
    pub label: Option<String>,
    pub origin_channel: String,
    pub origin_chat_id: String,
    pub status: SubagentStatus,
    /// Final text on success, error text on failure.
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SubagentTask {
    fn new(task: &str, label: Option<&str>, origin_channel: &str, origin_chat_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.to_string(),
            label: label.map(str::to_string),
            origin_channel: origin_channel.to_string(),
            origin_chat_id: origin_chat_id.to_string(),
            status: SubagentStatus::Pending,
            result: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Label if set, otherwise the task id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Session key of the isolated turn.
    pub fn session_key(&self) -> String {
        format!("subagent:{}", self.id)
    }

    /// Text delivered to the origin chat once the task is terminal.
    fn notice(&self) -> String {
        match self.status {
            SubagentStatus::Completed => {
                let result = self.result.as_deref().unwrap_or_default();
                match &self.label {
                    Some(label) => format!("[{}] {}", label, result),
                    None => result.to_string(),
                }
            }
            _ => format!(
                "Background task '{}' failed. Please try again later.",
                self.display_name()
            ),
        }
    }
}

type TaskTable = Arc<Mutex<HashMap<String, SubagentTask>>>;

fn lock_tasks(tasks: &TaskTable) -> MutexGuard<'_, HashMap<String, SubagentTask>> {
    tasks.lock().unwrap_or_else(|e| e.into_inner())
}

/// Move a task to its terminal state. Rejects a second transition.
fn finish(tasks: &TaskTable, id: &str, outcome: std::result::Result<String, String>) -> Result<SubagentTask> {
    let mut tasks = lock_tasks(tasks);
    let task = tasks
        .get_mut(id)
        .ok_or_else(|| ClawgateError::NotFound(format!("subagent task '{}'", id)))?;
    if task.status.is_terminal() {
        return Err(ClawgateError::Subagent(format!(
            "task '{}' already {}",
            id, task.status
        )));
    }
    match outcome {
        Ok(text) => {
            task.status = SubagentStatus::Completed;
            task.result = Some(text);
        }
        Err(err) => {
            task.status = SubagentStatus::Failed;
            task.result = Some(err);
        }
    }
    task.finished_at = Some(Utc::now());
    Ok(task.clone())
}

fn mark_running(tasks: &TaskTable, id: &str) {
    if let Some(task) = lock_tasks(tasks).get_mut(id) {
        if task.status == SubagentStatus::Pending {
            task.status = SubagentStatus::Running;
        }
    }
}

/// Everything a spawned execution needs, cloned out of the manager.
#[derive(Clone)]
struct Runner {
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    bus: MessageBus,
    config: Config,
    tasks: TaskTable,
    semaphore: Option<Arc<Semaphore>>,
}

impl Runner {
    async fn run(self, task: SubagentTask, cancel: CancellationToken) {
        let _permit = match &self.semaphore {
            Some(semaphore) => {
                let acquired = tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
                };
                match acquired {
                    Some(permit) => Some(permit),
                    None => {
                        self.complete(&task.id, Err("cancelled before start".to_string()));
                        return;
                    }
                }
            }
            None => None,
        };
        mark_running(&self.tasks, &task.id);
        info!(label = task.display_name(), "Subagent running");

        let agent = AgentLoop::new(
            self.config.clone(),
            SessionManager::new_memory(),
            Arc::clone(&self.providers),
            Arc::clone(&self.tools),
            self.bus.clone(),
        )
        .with_context_builder(ContextBuilder::new().with_system_prompt(SUBAGENT_PROMPT));

        let session_key = task.session_key();
        let turn_cancel = cancel.clone();
        let text = task.task.clone();
        let channel = task.origin_channel.clone();
        let chat_id = task.origin_chat_id.clone();
        // Own task so a panicking turn still ends in `failed`.
        let turn = tokio::spawn(async move {
            agent
                .process_direct_with_channel_cancel(
                    &text,
                    &session_key,
                    &channel,
                    &chat_id,
                    Some(turn_cancel),
                )
                .await
        });

        let outcome = match turn.await {
            Ok(Ok(_)) if cancel.is_cancelled() => Err(CANCELLED_NOTICE.to_string()),
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join) => Err(format!("subagent execution aborted: {}", join)),
        };
        self.complete(&task.id, outcome);
    }

    fn complete(&self, id: &str, outcome: std::result::Result<String, String>) {
        match finish(&self.tasks, id, outcome) {
            Ok(task) => {
                match task.status {
                    SubagentStatus::Completed => info!(
                        label = task.display_name(),
                        result_preview = %log_field("result_preview", task.result.as_deref().unwrap_or_default()),
                        "Subagent completed"
                    ),
                    _ => error!(
                        label = task.display_name(),
                        error = %log_field("error", task.result.as_deref().unwrap_or_default()),
                        "Subagent failed"
                    ),
                }
                self.bus.publish_outbound(OutboundMessage::new(
                    &task.origin_channel,
                    &task.origin_chat_id,
                    &task.notice(),
                ));
            }
            Err(e) => warn!(
                task_id = id,
                error = %log_field("error", &e.to_string()),
                "Subagent result not delivered"
            ),
        }
    }
}

/// Spawns and tracks background subagents.
///
/// # Example
///
/// ```rust,ignore
/// let manager = SubagentManager::new(providers, Arc::new(tools), bus.clone(), config);
/// let task = manager.spawn("summarize today's logs", Some("logs"), "telegram", "42")?;
/// assert_eq!(task.status, SubagentStatus::Pending);
/// // "[logs] ..." arrives on bus.subscribe("telegram") when it finishes.
/// ```
pub struct SubagentManager {
    runner: Runner,
    cancel: Mutex<CancellationToken>,
}

impl SubagentManager {
    /// `tools` is the agent's registry; `spawn` and `message` are removed
    /// from the copy handed to subagents.
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        bus: MessageBus,
        config: Config,
    ) -> Self {
        let max_concurrent = config.subagents.limit();
        let semaphore = max_concurrent.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            runner: Runner {
                providers,
                tools: Arc::new(tools.without(EXCLUDED_TOOLS)),
                bus,
                config,
                tasks: Arc::new(Mutex::new(HashMap::new())),
                semaphore,
            },
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Concurrency cap, `None` when unbounded.
    pub fn max_concurrent(&self) -> Option<usize> {
        self.runner.config.subagents.limit()
    }

    /// Names of the tools subagents can use.
    pub fn tool_names(&self) -> Vec<&str> {
        self.runner.tools.names()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record a task and start it in the background.
    ///
    /// Returns the `pending` record without waiting for the execution.
    pub fn spawn(
        &self,
        task: &str,
        label: Option<&str>,
        origin_channel: &str,
        origin_chat_id: &str,
    ) -> Result<SubagentTask> {
        let task_text = task.trim();
        if task_text.is_empty() {
            return Err(ClawgateError::Config("subagent task is empty".to_string()));
        }
        let label = label.map(str::trim).filter(|l| !l.is_empty());
        let record = SubagentTask::new(task_text, label, origin_channel, origin_chat_id);

        lock_tasks(&self.runner.tasks).insert(record.id.clone(), record.clone());

        let span = info_span!(
            "subagent",
            task_id = %record.id,
            origin = %format!("{}:{}", origin_channel, origin_chat_id),
        );
        info!(parent: &span, task_text = %log_field("task_text", task_text), "Subagent spawned");
        tokio::spawn(
            self.runner
                .clone()
                .run(record.clone(), self.cancel_token())
                .instrument(span),
        );

        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<SubagentTask> {
        lock_tasks(&self.runner.tasks).get(id).cloned()
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<SubagentTask> {
        let mut tasks: Vec<SubagentTask> =
            lock_tasks(&self.runner.tasks).values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    pub fn running_count(&self) -> usize {
        lock_tasks(&self.runner.tasks)
            .values()
            .filter(|t| t.status == SubagentStatus::Running)
            .count()
    }

    /// Record the outcome of a task by hand. Fails when it already finished.
    pub fn finish(&self, id: &str, outcome: std::result::Result<String, String>) -> Result<SubagentTask> {
        finish(&self.runner.tasks, id, outcome)
    }

    /// Cancel every task started so far. Later spawns are unaffected.
    pub fn cancel_all(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
        info!("Cancelled all subagents");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::registry::test_support::model;
    use crate::providers::{
        ChatOptions, LLMProvider, LLMResponse, ProviderFactory, ToolDefinition,
    };
    use crate::session::Message;
    use crate::tools::{EchoTool, MessageTool, SpawnTool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowProvider {
        delay: Duration,
        fail: bool,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LLMProvider for SlowProvider {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(ClawgateError::Provider("upstream exploded".into()));
            }
            let task = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LLMResponse::text(&format!("done: {}", task)))
        }

        fn default_model(&self) -> &str {
            "slow"
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct SlowFactory {
        delay: Duration,
        fail: bool,
        peak: Arc<AtomicUsize>,
    }

    impl ProviderFactory for SlowFactory {
        fn create(&self, _model: &crate::config::ModelConfig) -> Result<Arc<dyn LLMProvider>> {
            Ok(Arc::new(SlowProvider {
                delay: self.delay,
                fail: self.fail,
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::clone(&self.peak),
            }))
        }
    }

    fn manager(delay_ms: u64, fail: bool, max_concurrent: usize) -> (SubagentManager, MessageBus, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let providers = ProviderRegistry::new(
            vec![model("main", "ollama/main")],
            None,
            Arc::new(SlowFactory {
                delay: Duration::from_millis(delay_ms),
                fail,
                peak: Arc::clone(&peak),
            }),
        )
        .unwrap();
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool));
        tools.register(Box::new(SpawnTool::new(None)));
        let mut config = Config::default();
        let bus = MessageBus::new();
        tools.register(Box::new(MessageTool::new(bus.clone())));
        config.subagents.max_concurrent = max_concurrent;
        (
            SubagentManager::new(Arc::new(providers), Arc::new(tools), bus.clone(), config),
            bus,
            peak,
        )
    }

    async fn next(sub: &mut crate::bus::OutboundSubscription) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for subagent")
            .expect("bus closed")
    }

    #[tokio::test]
    async fn test_spawn_returns_immediately_and_delivers_once() {
        let (manager, bus, _) = manager(200, false, 0);
        let mut sub = bus.subscribe("telegram");

        let started = std::time::Instant::now();
        let task = manager
            .spawn("count the files", Some("files"), "telegram", "42")
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(task.status, SubagentStatus::Pending);
        assert_eq!(task.session_key(), format!("subagent:{}", task.id));

        let msg = next(&mut sub).await;
        assert_eq!(msg.chat_id, "42");
        assert_eq!(msg.content, "[files] done: count the files");

        let done = manager.get(&task.id).unwrap();
        assert_eq!(done.status, SubagentStatus::Completed);
        assert!(done.finished_at.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.pending_outbound("telegram"), 0);
    }

    #[tokio::test]
    async fn test_unlabelled_result_is_bare() {
        let (manager, bus, _) = manager(0, false, 0);
        let mut sub = bus.subscribe("cli");
        manager.spawn("ping", None, "cli", "direct").unwrap();
        assert_eq!(next(&mut sub).await.content, "done: ping");
    }

    #[tokio::test]
    async fn test_failure_publishes_plain_notice() {
        let (manager, bus, _) = manager(0, true, 0);
        let mut sub = bus.subscribe("slack");
        let task = manager.spawn("break", Some("deploy"), "slack", "C1").unwrap();

        let msg = next(&mut sub).await;
        assert_eq!(
            msg.content,
            "Background task 'deploy' failed. Please try again later."
        );
        assert!(!msg.content.contains("exploded"));

        let failed = manager.get(&task.id).unwrap();
        assert_eq!(failed.status, SubagentStatus::Failed);
        assert!(failed.result.unwrap().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_completion_is_one_way() {
        let (manager, bus, _) = manager(0, false, 0);
        let mut sub = bus.subscribe("cli");
        let task = manager.spawn("once", None, "cli", "direct").unwrap();
        next(&mut sub).await;

        let err = manager.finish(&task.id, Ok("again".into())).unwrap_err();
        assert!(matches!(err, ClawgateError::Subagent(_)));
        assert_eq!(
            manager.get(&task.id).unwrap().result.as_deref(),
            Some("done: once")
        );
        assert!(manager.finish("missing", Ok(String::new())).is_err());
    }

    #[tokio::test]
    async fn test_empty_task_rejected() {
        let (manager, _, _) = manager(0, false, 0);
        let err = manager.spawn("   ", None, "cli", "direct").unwrap_err();
        assert!(matches!(err, ClawgateError::Config(_)));
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let (manager, bus, peak) = manager(100, false, 1);
        let mut sub = bus.subscribe("cli");
        for i in 0..3 {
            manager
                .spawn(&format!("job {}", i), None, "cli", "direct")
                .unwrap();
        }
        for _ in 0..3 {
            next(&mut sub).await;
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.list().len(), 3);
    }

    #[tokio::test]
    async fn test_unbounded_runs_concurrently() {
        let (manager, bus, peak) = manager(200, false, 0);
        let mut sub = bus.subscribe("cli");
        for i in 0..3 {
            manager
                .spawn(&format!("job {}", i), None, "cli", "direct")
                .unwrap();
        }
        for _ in 0..3 {
            next(&mut sub).await;
        }
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_cancel_all_fails_running_tasks() {
        let (manager, bus, _) = manager(10_000, false, 0);
        let mut sub = bus.subscribe("cli");
        let task = manager.spawn("forever", Some("long"), "cli", "direct").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.running_count(), 1);

        manager.cancel_all();
        let msg = next(&mut sub).await;
        assert!(msg.content.contains("'long' failed"));
        assert_eq!(manager.get(&task.id).unwrap().status, SubagentStatus::Failed);
    }

    #[tokio::test]
    async fn test_subagents_cannot_spawn_or_message() {
        let (manager, _, _) = manager(0, false, 0);
        assert_eq!(manager.tool_names(), vec!["echo"]);
    }
}
