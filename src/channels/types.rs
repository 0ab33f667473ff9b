//! Channel trait and types for Clawgate
//!
//! Every chat platform adapter implements [`Channel`]. Adapters publish what
//! they receive to the bus and deliver what the bus routes to them; they
//! never touch sessions or subagent tasks.

use async_trait::async_trait;

use crate::bus::{MessageBus, OutboundMessage};
use crate::error::Result;

/// A chat platform adapter.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use clawgate::bus::{MessageBus, OutboundMessage};
/// use clawgate::channels::{BaseChannelConfig, Channel};
/// use clawgate::error::Result;
///
/// struct MyChannel {
///     config: BaseChannelConfig,
///     running: bool,
/// }
///
/// #[async_trait]
/// impl Channel for MyChannel {
///     fn name(&self) -> &str {
///         &self.config.name
///     }
///
///     async fn start(&mut self, _bus: MessageBus) -> Result<()> {
///         self.running = true;
///         Ok(())
///     }
///
///     async fn stop(&mut self) -> Result<()> {
///         self.running = false;
///         Ok(())
///     }
///
///     async fn send(&self, msg: OutboundMessage) -> Result<()> {
///         println!("Sending: {}", msg.content);
///         Ok(())
///     }
///
///     fn is_running(&self) -> bool {
///         self.running
///     }
///
///     fn is_allowed(&self, sender_id: &str) -> bool {
///         self.config.is_allowed(sender_id)
///     }
/// }
/// ```
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique name of this channel; outbound messages are routed by it.
    fn name(&self) -> &str;

    /// Connect and start publishing inbound messages to `bus`.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel fails to start (invalid token,
    /// port in use, network failure).
    async fn start(&mut self, bus: MessageBus) -> Result<()>;

    /// Disconnect and release resources.
    async fn stop(&mut self) -> Result<()>;

    /// Deliver one outbound message. Formatting for the platform happens here.
    async fn send(&self, msg: OutboundMessage) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Whether `sender_id` may talk to the agent through this channel.
    fn is_allowed(&self, sender_id: &str) -> bool;
}

/// Base configuration shared by all channels.
///
/// ```
/// use clawgate::channels::BaseChannelConfig;
///
/// let open = BaseChannelConfig::new("telegram");
/// assert!(open.is_allowed("anyone"));
///
/// let closed = BaseChannelConfig::with_allowlist("telegram", vec!["user1".to_string()]);
/// assert!(closed.is_allowed("user1"));
/// assert!(!closed.is_allowed("user2"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct BaseChannelConfig {
    pub name: String,
    /// Allowed sender IDs. Empty allows everyone.
    pub allowlist: Vec<String>,
}

impl BaseChannelConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            allowlist: Vec::new(),
        }
    }

    pub fn with_allowlist(name: &str, allowlist: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            allowlist,
        }
    }

    pub fn is_allowed(&self, sender_id: &str) -> bool {
        self.allowlist.is_empty() || self.allowlist.iter().any(|a| a == sender_id)
    }
}
