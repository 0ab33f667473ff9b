//! Message Bus Module
//!
//! This module provides the message bus that decouples channel adapters from
//! the agent loop. Inbound messages (adapters and scheduler → agent) flow
//! through one unbounded FIFO queue, so messages for the same session reach
//! the agent in publish order. Outbound messages (agent → adapters) are
//! routed by channel name to per-channel subscriptions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Channel   │────>│  MessageBus │────>│  AgentLoop  │
//! │  (Telegram) │     │  (inbound)  │     │             │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            │ outbound, keyed by channel name
//!                            ▼
//! ┌─────────────┐     ┌──────────────────────────────┐
//! │   Channel   │<────│ subscribe("telegram")        │
//! │  (Telegram) │     │ bounded backlog when offline │
//! └─────────────┘     └──────────────────────────────┘
//! ```
//!
//! Publishing never blocks and never fails on a healthy bus. When a channel
//! has no live subscriber its messages are kept in a bounded backlog; once the
//! backlog is full the oldest message is dropped and a warning is logged.
//!
//! # Example
//!
//! ```
//! use clawgate::bus::{MessageBus, InboundMessage, OutboundMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = MessageBus::new();
//!
//!     let msg = InboundMessage::new("telegram", "user123", "chat456", "Hello");
//!     bus.publish_inbound(msg).unwrap();
//!     let received = bus.consume_inbound().await.unwrap();
//!     assert_eq!(received.content, "Hello");
//!
//!     let mut sub = bus.subscribe("telegram");
//!     bus.publish_outbound(OutboundMessage::new("telegram", "chat456", "Hi!"));
//!     assert_eq!(sub.recv().await.unwrap().content, "Hi!");
//! }
//! ```

pub mod message;

pub use message::{InboundMessage, OutboundMessage};

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{ClawgateError, Result};

/// Default number of outbound messages kept per channel while no subscriber
/// is attached.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 100;

/// The central message bus for routing messages between channels and agents.
///
/// Cloning a `MessageBus` yields another handle to the same queues.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<InboundMessage>>>,
    outbound: Arc<OutboundRouter>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

#[derive(Default)]
struct Topic {
    subscriber: Option<Subscriber>,
    backlog: VecDeque<OutboundMessage>,
}

/// Per-channel outbound routing state.
///
/// Guarded by a std mutex: every operation is short and synchronous, and
/// [`OutboundSubscription`] must be able to hand messages back from `Drop`.
struct OutboundRouter {
    capacity: usize,
    topics: std::sync::Mutex<HashMap<String, Topic>>,
    next_subscriber_id: AtomicU64,
    dropped: AtomicU64,
}

impl OutboundRouter {
    fn topics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn buffer(&self, topic: &mut Topic, msg: OutboundMessage, front: bool) {
        if front {
            topic.backlog.push_front(msg);
        } else {
            topic.backlog.push_back(msg);
        }
        while topic.backlog.len() > self.capacity {
            if let Some(dropped) = topic.backlog.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel = %dropped.channel,
                    chat_id = %dropped.chat_id,
                    capacity = self.capacity,
                    "Outbound backlog full, dropping oldest message"
                );
            }
        }
    }

    fn publish(&self, msg: OutboundMessage) {
        let mut topics = self.topics();
        let topic = topics.entry(msg.channel.clone()).or_default();

        let undelivered = match &topic.subscriber {
            Some(sub) => match sub.tx.send(msg) {
                Ok(()) => return,
                Err(err) => err.0,
            },
            None => msg,
        };

        if topic.subscriber.take().is_some() {
            debug!(channel = %undelivered.channel, "Outbound subscriber gone, buffering");
        }
        self.buffer(topic, undelivered, false);
    }

    fn release(&self, channel: &str, id: u64, leftovers: Vec<OutboundMessage>) {
        let mut topics = self.topics();
        let Some(topic) = topics.get_mut(channel) else {
            return;
        };

        if topic.subscriber.as_ref().is_some_and(|s| s.id == id) {
            topic.subscriber = None;
        }

        let mut pending = Vec::new();
        for msg in leftovers {
            match &topic.subscriber {
                Some(newer) => {
                    if let Err(err) = newer.tx.send(msg) {
                        pending.push(err.0);
                    }
                }
                None => pending.push(msg),
            }
        }
        for msg in pending.into_iter().rev() {
            self.buffer(topic, msg, true);
        }
    }
}

impl MessageBus {
    /// Creates a new `MessageBus` with the default outbound backlog capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Creates a new `MessageBus` keeping at most `outbound_capacity`
    /// undelivered messages per channel (minimum 1).
    ///
    /// # Example
    /// ```
    /// use clawgate::bus::MessageBus;
    ///
    /// let bus = MessageBus::with_capacity(500);
    /// assert_eq!(bus.outbound_capacity(), 500);
    /// ```
    pub fn with_capacity(outbound_capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound: Arc::new(OutboundRouter {
                capacity: outbound_capacity.max(1),
                topics: std::sync::Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Maximum number of undelivered messages kept per channel.
    pub fn outbound_capacity(&self) -> usize {
        self.outbound.capacity
    }

    /// Publishes an inbound message to the agent loop.
    ///
    /// Never blocks. Fails only with `ClawgateError::BusClosed` after
    /// [`MessageBus::close`].
    pub fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| ClawgateError::BusClosed)
    }

    /// Waits for the next inbound message.
    ///
    /// Returns `None` once the bus is closed and every queued message has
    /// been consumed.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Publishes an outbound message to the channel it is addressed to.
    ///
    /// Never blocks and never fails; see the module docs for buffering.
    pub fn publish_outbound(&self, msg: OutboundMessage) {
        self.outbound.publish(msg);
    }

    /// Subscribes to outbound messages addressed to `channel`.
    ///
    /// Any backlog for the channel is delivered first, in publish order.
    /// Subscribing again replaces the previous subscription, which then
    /// ends after yielding what it had already received.
    pub fn subscribe(&self, channel: &str) -> OutboundSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .outbound
            .next_subscriber_id
            .fetch_add(1, Ordering::Relaxed);

        let mut topics = self.outbound.topics();
        let topic = topics.entry(channel.to_string()).or_default();
        for msg in topic.backlog.drain(..) {
            let _ = tx.send(msg);
        }
        if topic.subscriber.replace(Subscriber { id, tx }).is_some() {
            debug!(channel = %channel, "Replacing outbound subscriber");
        }

        OutboundSubscription {
            channel: channel.to_string(),
            id,
            rx,
            router: Arc::clone(&self.outbound),
        }
    }

    /// Take the backlog of a channel that is polled instead of subscribed.
    ///
    /// Returns nothing while a subscriber is attached.
    pub fn drain_outbound(&self, channel: &str) -> Vec<OutboundMessage> {
        let mut topics = self.outbound.topics();
        match topics.get_mut(channel) {
            Some(topic) if topic.subscriber.is_none() => topic.backlog.drain(..).collect(),
            _ => Vec::new(),
        }
    }

    /// Number of outbound messages waiting for a subscriber on `channel`.
    pub fn pending_outbound(&self, channel: &str) -> usize {
        self.outbound
            .topics()
            .get(channel)
            .map(|t| t.backlog.len())
            .unwrap_or(0)
    }

    /// Returns true if `channel` currently has a live subscriber.
    pub fn has_subscriber(&self, channel: &str) -> bool {
        self.outbound
            .topics()
            .get(channel)
            .and_then(|t| t.subscriber.as_ref())
            .is_some_and(|s| !s.tx.is_closed())
    }

    /// Total number of outbound messages dropped because a backlog was full.
    pub fn dropped_outbound(&self) -> u64 {
        self.outbound.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting inbound messages. Queued messages can still be consumed.
    pub async fn close(&self) {
        self.inbound_rx.lock().await.close();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A stream of outbound messages for one channel.
///
/// Dropping the subscription hands any messages it received but did not
/// yield back to the bus, so a reconnecting adapter sees them again.
pub struct OutboundSubscription {
    channel: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
    router: Arc<OutboundRouter>,
}

impl OutboundSubscription {
    /// The channel this subscription receives messages for.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next outbound message.
    ///
    /// Returns `None` when the subscription has been replaced by a newer one.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }
}

impl Stream for OutboundSubscription {
    type Item = OutboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for OutboundSubscription {
    fn drop(&mut self) {
        self.rx.close();
        let mut leftovers = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            leftovers.push(msg);
        }
        self.router.release(&self.channel, self.id, leftovers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[test]
    fn test_message_bus_default() {
        let bus = MessageBus::default();
        assert_eq!(bus.outbound_capacity(), DEFAULT_OUTBOUND_CAPACITY);
        assert_eq!(bus.dropped_outbound(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let bus = MessageBus::with_capacity(0);
        assert_eq!(bus.outbound_capacity(), 1);
    }

    #[tokio::test]
    async fn test_drain_outbound_takes_backlog_once() {
        let bus = MessageBus::new();
        bus.publish_outbound(OutboundMessage::new("web", "default", "first"));
        bus.publish_outbound(OutboundMessage::new("web", "default", "second"));

        let drained: Vec<String> = bus
            .drain_outbound("web")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(drained, vec!["first", "second"]);
        assert!(bus.drain_outbound("web").is_empty());
        assert!(bus.drain_outbound("never-used").is_empty());
    }

    #[tokio::test]
    async fn test_drain_outbound_leaves_subscribed_channel_alone() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe("telegram");
        bus.publish_outbound(OutboundMessage::new("telegram", "1", "hi"));
        assert!(bus.drain_outbound("telegram").is_empty());
        assert_eq!(sub.recv().await.unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_bus_inbound_flow() {
        let bus = MessageBus::new();
        let msg = InboundMessage::new("test", "user1", "chat1", "Hello");
        bus.publish_inbound(msg).unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.content, "Hello");
        assert_eq!(received.session_key, "test:chat1");
    }

    #[tokio::test]
    async fn test_inbound_preserves_publish_order() {
        let bus = MessageBus::new();
        for i in 0..50 {
            bus.publish_inbound(InboundMessage::new("t", "u", "c", &format!("m{}", i)))
                .unwrap();
        }
        for i in 0..50 {
            let msg = bus.consume_inbound().await.unwrap();
            assert_eq!(msg.content, format!("m{}", i));
        }
    }

    #[tokio::test]
    async fn test_bus_clone_shares_queues() {
        let bus = MessageBus::new();
        let producer = bus.clone();
        producer
            .publish_inbound(InboundMessage::new("t", "u", "c", "from clone"))
            .unwrap();
        assert_eq!(bus.consume_inbound().await.unwrap().content, "from clone");
    }

    #[tokio::test]
    async fn test_bus_concurrent_producers() {
        let bus = MessageBus::new();
        let mut handles = Vec::new();
        for p in 0..4 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    bus.publish_inbound(InboundMessage::new(
                        "t",
                        "u",
                        &format!("chat{}", p),
                        &format!("{}", i),
                    ))
                    .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut last_seen: HashMap<String, i32> = HashMap::new();
        for _ in 0..100 {
            let msg = bus.consume_inbound().await.unwrap();
            let n: i32 = msg.content.parse().unwrap();
            let prev = last_seen.insert(msg.session_key.clone(), n);
            if let Some(prev) = prev {
                assert!(n > prev, "per-session order violated");
            }
        }
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("t", "u", "c", "last"))
            .unwrap();
        bus.close().await;

        assert!(matches!(
            bus.publish_inbound(InboundMessage::new("t", "u", "c", "late")),
            Err(ClawgateError::BusClosed)
        ));
        assert_eq!(bus.consume_inbound().await.unwrap().content, "last");
        assert!(bus.consume_inbound().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_receives_only_own_channel() {
        let bus = MessageBus::new();
        let mut telegram = bus.subscribe("telegram");
        let mut discord = bus.subscribe("discord");

        bus.publish_outbound(OutboundMessage::new("telegram", "c1", "for telegram"));
        bus.publish_outbound(OutboundMessage::new("discord", "c2", "for discord"));

        assert_eq!(telegram.recv().await.unwrap().content, "for telegram");
        assert_eq!(discord.recv().await.unwrap().content, "for discord");
        assert!(
            tokio::time::timeout(Duration::from_millis(20), telegram.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_outbound_buffered_until_subscribe() {
        let bus = MessageBus::new();
        bus.publish_outbound(OutboundMessage::new("slack", "c", "one"));
        bus.publish_outbound(OutboundMessage::new("slack", "c", "two"));
        assert_eq!(bus.pending_outbound("slack"), 2);
        assert!(!bus.has_subscriber("slack"));

        let mut sub = bus.subscribe("slack");
        assert_eq!(bus.pending_outbound("slack"), 0);
        assert!(bus.has_subscriber("slack"));
        assert_eq!(sub.recv().await.unwrap().content, "one");
        assert_eq!(sub.recv().await.unwrap().content, "two");
    }

    #[tokio::test]
    async fn test_backlog_drops_oldest_when_full() {
        let bus = MessageBus::with_capacity(3);
        for i in 0..5 {
            bus.publish_outbound(OutboundMessage::new("feishu", "c", &format!("m{}", i)));
        }
        assert_eq!(bus.pending_outbound("feishu"), 3);
        assert_eq!(bus.dropped_outbound(), 2);

        let sub = bus.subscribe("feishu");
        let got: Vec<String> = sub.take(3).map(|m| m.content).collect().await;
        assert_eq!(got, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_dropped_subscription_requeues_undelivered() {
        let bus = MessageBus::new();
        let sub = bus.subscribe("telegram");
        bus.publish_outbound(OutboundMessage::new("telegram", "c", "a"));
        bus.publish_outbound(OutboundMessage::new("telegram", "c", "b"));
        drop(sub);

        assert_eq!(bus.pending_outbound("telegram"), 2);
        let mut again = bus.subscribe("telegram");
        assert_eq!(again.recv().await.unwrap().content, "a");
        assert_eq!(again.recv().await.unwrap().content, "b");
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous() {
        let bus = MessageBus::new();
        let mut old = bus.subscribe("web");
        let mut new = bus.subscribe("web");

        bus.publish_outbound(OutboundMessage::new("web", "c", "hello"));
        assert_eq!(new.recv().await.unwrap().content, "hello");
        assert!(old.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_old_subscription_leftovers_forwarded_to_new() {
        let bus = MessageBus::new();
        let old = bus.subscribe("web");
        bus.publish_outbound(OutboundMessage::new("web", "c", "early"));
        let mut new = bus.subscribe("web");
        drop(old);

        assert_eq!(new.recv().await.unwrap().content, "early");
        assert_eq!(bus.pending_outbound("web"), 0);
    }
}
