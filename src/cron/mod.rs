//! Cron scheduler for background agent turns.
//!
//! Jobs live in memory; they come from `cron.jobs` in the config or are
//! added at runtime. Every second the scheduler publishes each due job as a
//! scheduled [`InboundMessage`], so the agent can tell it apart from a
//! message typed by the user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::bus::{InboundMessage, MessageBus};
use crate::error::{ClawgateError, Result};
use crate::utils::string::log_field;

const TICK: std::time::Duration = std::time::Duration::from_secs(1);

/// Longest accepted `Every` interval (one year).
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronSchedule {
    /// Repeats every `secs` seconds, first run `secs` after the job is added.
    Every { secs: u64 },
    /// Runs once at a unix timestamp in milliseconds.
    At { unix_ms: i64 },
}

/// A job: what to send, where, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// Assigned on [`Scheduler::add_job`] when empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub schedule: CronSchedule,
    pub channel: String,
    pub chat_id: String,
    /// Text the agent receives as the user message.
    pub message: String,
}

impl CronJob {
    pub fn new(name: &str, schedule: CronSchedule, channel: &str, chat_id: &str, message: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            schedule,
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            message: message.to_string(),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn after_interval(now: i64, secs: u64) -> i64 {
    let ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
    now.saturating_add(ms)
}

fn first_run(schedule: &CronSchedule, now: i64) -> Option<i64> {
    match schedule {
        CronSchedule::Every { secs } => Some(after_interval(now, *secs)),
        CronSchedule::At { unix_ms } => (*unix_ms > now).then_some(*unix_ms),
    }
}

#[derive(Debug, Clone)]
struct ScheduledJob {
    job: CronJob,
    next_run_ms: i64,
}

/// In-memory job scheduler publishing to the bus.
pub struct Scheduler {
    jobs: Arc<RwLock<Vec<ScheduledJob>>>,
    bus: MessageBus,
    running: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            bus,
            running: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Validate and schedule a job, returning it with its id.
    ///
    /// # Errors
    ///
    /// Empty target or message, an interval of zero or above
    /// [`MAX_INTERVAL_SECS`], a time in the past, or a duplicate id.
    pub async fn add_job(&self, mut job: CronJob) -> Result<CronJob> {
        if job.channel.trim().is_empty() || job.chat_id.trim().is_empty() {
            return Err(ClawgateError::Config(format!(
                "cron job '{}' needs a channel and chat_id",
                job.name
            )));
        }
        if job.message.trim().is_empty() {
            return Err(ClawgateError::Config(format!(
                "cron job '{}' has an empty message",
                job.name
            )));
        }
        if matches!(job.schedule, CronSchedule::Every { secs: 0 }) {
            return Err(ClawgateError::Config(format!(
                "cron job '{}' interval must be at least 1 second",
                job.name
            )));
        }
        if let CronSchedule::Every { secs } = job.schedule {
            if secs > MAX_INTERVAL_SECS {
                return Err(ClawgateError::Config(format!(
                    "cron job '{}' interval {}s exceeds the maximum of {}s",
                    job.name, secs, MAX_INTERVAL_SECS
                )));
            }
        }
        let next_run_ms = first_run(&job.schedule, now_ms()).ok_or_else(|| {
            ClawgateError::Config(format!("cron job '{}' is scheduled in the past", job.name))
        })?;

        if job.id.trim().is_empty() {
            job.id = Uuid::new_v4().simple().to_string()[..8].to_string();
        }

        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|s| s.job.id == job.id) {
            return Err(ClawgateError::Config(format!(
                "cron job id '{}' already exists",
                job.id
            )));
        }
        info!(job_id = %job.id, job_name = %job.name, "Cron job added");
        jobs.push(ScheduledJob {
            job: job.clone(),
            next_run_ms,
        });
        Ok(job)
    }

    /// Returns whether a job was removed.
    pub async fn remove_job(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|s| s.job.id != job_id);
        jobs.len() < before
    }

    /// Jobs ordered by next run.
    pub async fn list_jobs(&self) -> Vec<CronJob> {
        let mut jobs = self.jobs.read().await.clone();
        jobs.sort_by_key(|s| s.next_run_ms);
        jobs.into_iter().map(|s| s.job).collect()
    }

    /// Publish every job due at `now`; one-shot jobs are dropped afterwards.
    async fn tick_at(&self, now: i64) -> usize {
        let mut jobs = self.jobs.write().await;
        let mut published = 0;
        for scheduled in jobs.iter_mut().filter(|s| s.next_run_ms <= now) {
            let job = &scheduled.job;
            let msg = InboundMessage::scheduled(&job.channel, &job.chat_id, &job.message);
            match self.bus.publish_inbound(msg) {
                Ok(()) => {
                    debug!(job_id = %job.id, channel = %job.channel, "Cron job fired");
                    published += 1;
                }
                Err(e) => error!(
                    job_id = %job.id,
                    error = %log_field("error", &e.to_string()),
                    "Failed to publish cron job"
                ),
            }
            scheduled.next_run_ms = match job.schedule {
                CronSchedule::Every { secs } => after_interval(now, secs),
                CronSchedule::At { .. } => i64::MIN,
            };
        }
        jobs.retain(|s| s.next_run_ms != i64::MIN);
        published
    }

    /// Start the tick loop (idempotent).
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Cron scheduler started");
            let mut interval = tokio::time::interval(TICK);
            while scheduler.running.load(Ordering::SeqCst) {
                interval.tick().await;
                scheduler.tick_at(now_ms()).await;
            }
        });
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            info!("Cron scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
