//! Channels module - chat platform adapters
//!
//! Adapters receive messages from users and publish them to the bus, and
//! deliver the bus's outbound messages back to the platform.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 ChannelManager                │
//! │   ┌─────────┐   ┌─────────┐   ┌─────────┐     │
//! │   │ Webhook │   │  ...    │   │  ...    │     │
//! │   └────┬────┘   └────┬────┘   └────┬────┘     │
//! │        └─────────────┼─────────────┘          │
//! │                ┌─────┴─────┐                  │
//! │                │MessageBus │                  │
//! │                └───────────┘                  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! A new platform implements [`Channel`] and is registered with the
//! [`ChannelManager`]; see [`build_channels`].

pub mod manager;
mod types;
pub mod webhook;

pub use manager::ChannelManager;
pub use types::{BaseChannelConfig, Channel};
pub use webhook::WebhookChannel;

use tracing::info;

use crate::config::ChannelsConfig;

/// Adapters enabled in `config`.
pub fn build_channels(config: &ChannelsConfig) -> Vec<Box<dyn Channel>> {
    let mut channels: Vec<Box<dyn Channel>> = Vec::new();
    if let Some(webhook) = config.webhook.as_ref().filter(|w| w.enabled) {
        info!(port = webhook.port, "Webhook channel enabled");
        channels.push(Box::new(WebhookChannel::new(webhook.clone())));
    }
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;

    #[test]
    fn test_build_channels_respects_enabled() {
        assert!(build_channels(&ChannelsConfig::default()).is_empty());

        let mut config = ChannelsConfig {
            webhook: Some(WebhookConfig::default()),
        };
        assert!(build_channels(&config).is_empty());

        if let Some(w) = config.webhook.as_mut() {
            w.enabled = true;
        }
        let channels = build_channels(&config);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name(), "webhook");
    }
}
