//! Channel Manager for Clawgate
//!
//! Owns the registered adapters, starts and stops them, and runs one
//! outbound dispatcher per adapter. A dispatcher drains
//! `bus.subscribe(name)` and hands each message to the adapter's `send`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{MessageBus, OutboundSubscription};
use crate::error::Result;
use crate::utils::string::log_field;

use super::Channel;

type SharedChannel = Arc<RwLock<Box<dyn Channel>>>;

/// Manages the lifecycle of all channel adapters.
///
/// # Example
///
/// ```ignore
/// let manager = ChannelManager::new(bus.clone());
/// manager.register(Box::new(WebhookChannel::new(webhook_config))).await;
/// manager.start_all().await?;
/// // ...
/// manager.stop_all().await?;
/// ```
pub struct ChannelManager {
    channels: RwLock<BTreeMap<String, SharedChannel>>,
    bus: MessageBus,
    shutdown_tx: watch::Sender<bool>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelManager {
    /// ```
    /// use clawgate::bus::MessageBus;
    /// use clawgate::channels::ChannelManager;
    ///
    /// # tokio_test::block_on(async {
    /// let manager = ChannelManager::new(MessageBus::new());
    /// assert!(manager.channel_names().await.is_empty());
    /// # })
    /// ```
    pub fn new(bus: MessageBus) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            channels: RwLock::new(BTreeMap::new()),
            bus,
            shutdown_tx,
            dispatchers: Mutex::new(Vec::new()),
        }
    }

    /// Register an adapter. A channel with the same name is replaced.
    pub async fn register(&self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "Registering channel");
        let previous = self
            .channels
            .write()
            .await
            .insert(name.clone(), Arc::new(RwLock::new(channel)));
        if previous.is_some() {
            warn!(channel = %name, "Replaced previously registered channel");
        }
    }

    /// Registered channel names, sorted.
    pub async fn channel_names(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    pub async fn has_channel(&self, name: &str) -> bool {
        self.channels.read().await.contains_key(name)
    }

    /// Names of channels whose adapter reports running.
    pub async fn running_channels(&self) -> Vec<String> {
        let channels = self.channels.read().await;
        let mut running = Vec::new();
        for (name, channel) in channels.iter() {
            if channel.read().await.is_running() {
                running.push(name.clone());
            }
        }
        running
    }

    /// Start every adapter and its dispatcher.
    ///
    /// A channel that fails to start is logged and skipped; the others
    /// still start.
    pub async fn start_all(&self) -> Result<()> {
        let mut dispatchers = self.dispatchers.lock().await;
        if dispatchers.iter().any(|h| !h.is_finished()) {
            warn!("Channel dispatchers already running, skipping start");
            return Ok(());
        }
        dispatchers.clear();
        self.shutdown_tx.send_replace(false);

        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            info!(channel = %name, "Starting channel");
            if let Err(e) = channel.write().await.start(self.bus.clone()).await {
                error!(
                    channel = %name,
                    error = %log_field("error", &e.to_string()),
                    "Failed to start channel"
                );
                continue;
            }
            let subscription = self.bus.subscribe(name);
            let shutdown_rx = self.shutdown_tx.subscribe();
            dispatchers.push(tokio::spawn(dispatch_outbound(
                Arc::clone(channel),
                subscription,
                shutdown_rx,
            )));
        }
        info!(started = dispatchers.len(), "Channels started");
        Ok(())
    }

    /// Stop dispatchers, then every adapter. Errors are logged per channel.
    ///
    /// Messages a dispatcher had not delivered go back to the bus backlog.
    pub async fn stop_all(&self) -> Result<()> {
        debug!("Signaling dispatchers to stop");
        self.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.dispatchers.lock().await.drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("Dispatcher did not stop within timeout");
            }
        }

        let channels = self.channels.read().await;
        for (name, channel) in channels.iter() {
            info!(channel = %name, "Stopping channel");
            if let Err(e) = channel.write().await.stop().await {
                error!(
                    channel = %name,
                    error = %log_field("error", &e.to_string()),
                    "Failed to stop channel"
                );
            }
        }
        Ok(())
    }
}

/// Deliver one channel's outbound messages until shutdown.
async fn dispatch_outbound(
    channel: SharedChannel,
    mut subscription: OutboundSubscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let name = subscription.channel().to_string();
    debug!(channel = %name, "Outbound dispatcher started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            msg = subscription.recv() => {
                let Some(msg) = msg else { break };
                let chat_id = msg.chat_id.clone();
                if let Err(e) = channel.read().await.send(msg).await {
                    error!(
                        channel = %name,
                        chat_id = %chat_id,
                        error = %log_field("error", &e.to_string()),
                        "Failed to deliver outbound message"
                    );
                }
            }
        }
    }
    debug!(channel = %name, "Outbound dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OutboundMessage;
    use crate::error::ClawgateError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct RecordingChannel {
        name: String,
        running: bool,
        fail_start: bool,
        sent: Arc<StdMutex<Vec<OutboundMessage>>>,
    }

    impl RecordingChannel {
        fn new(name: &str) -> (Self, Arc<StdMutex<Vec<OutboundMessage>>>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    name: name.to_string(),
                    running: false,
                    fail_start: false,
                    sent: Arc::clone(&sent),
                },
                sent,
            )
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&mut self, _bus: MessageBus) -> Result<()> {
            if self.fail_start {
                return Err(ClawgateError::Channel("bad token".into()));
            }
            self.running = true;
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.running = false;
            Ok(())
        }

        async fn send(&self, msg: OutboundMessage) -> Result<()> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn is_allowed(&self, _sender_id: &str) -> bool {
            true
        }
    }

    async fn wait_for(sent: &Arc<StdMutex<Vec<OutboundMessage>>>, n: usize) {
        for _ in 0..100 {
            if sent.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} deliveries", n);
    }

    #[tokio::test]
    async fn test_routes_by_channel_name() {
        let bus = MessageBus::new();
        let manager = ChannelManager::new(bus.clone());
        let (alpha, alpha_sent) = RecordingChannel::new("alpha");
        let (beta, beta_sent) = RecordingChannel::new("beta");
        manager.register(Box::new(alpha)).await;
        manager.register(Box::new(beta)).await;
        assert_eq!(manager.channel_names().await, vec!["alpha", "beta"]);

        manager.start_all().await.unwrap();
        bus.publish_outbound(OutboundMessage::new("beta", "1", "for beta"));
        bus.publish_outbound(OutboundMessage::new("alpha", "2", "for alpha"));

        wait_for(&alpha_sent, 1).await;
        wait_for(&beta_sent, 1).await;
        assert_eq!(alpha_sent.lock().unwrap()[0].content, "for alpha");
        assert_eq!(beta_sent.lock().unwrap()[0].content, "for beta");

        manager.stop_all().await.unwrap();
        assert!(manager.running_channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_backlog_delivered_on_start() {
        let bus = MessageBus::new();
        bus.publish_outbound(OutboundMessage::new("alpha", "1", "early"));
        let manager = ChannelManager::new(bus.clone());
        let (alpha, sent) = RecordingChannel::new("alpha");
        manager.register(Box::new(alpha)).await;

        manager.start_all().await.unwrap();
        wait_for(&sent, 1).await;
        assert_eq!(sent.lock().unwrap()[0].content, "early");
        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_does_not_block_others() {
        let bus = MessageBus::new();
        let manager = ChannelManager::new(bus.clone());
        let (mut broken, _) = RecordingChannel::new("broken");
        broken.fail_start = true;
        let (good, _) = RecordingChannel::new("good");
        manager.register(Box::new(broken)).await;
        manager.register(Box::new(good)).await;

        manager.start_all().await.unwrap();
        assert_eq!(manager.running_channels().await, vec!["good"]);
        assert!(!bus.has_subscriber("broken"));
        manager.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_returns_undelivered_to_bus() {
        let bus = MessageBus::new();
        let manager = ChannelManager::new(bus.clone());
        let (alpha, _) = RecordingChannel::new("alpha");
        manager.register(Box::new(alpha)).await;
        manager.start_all().await.unwrap();
        manager.stop_all().await.unwrap();

        bus.publish_outbound(OutboundMessage::new("alpha", "1", "after stop"));
        assert_eq!(bus.pending_outbound("alpha"), 1);
    }
}
