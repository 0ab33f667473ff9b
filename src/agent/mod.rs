//! Agent module - Core AI agent logic and conversation handling
//!
//! The agent is responsible for:
//!
//! - Processing inbound messages from the bus, one turn per message
//! - Building conversation context with the system prompt and a windowed history
//! - Calling the model chain with failover
//! - Executing tool calls and feeding results back to the model
//! - Keeping scheduled-job noise away from users
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐
//! │  MessageBus │────>│  AgentLoop  │────>│ ProviderRegistry │
//! │  (inbound)  │     │             │     │  (model chain)   │
//! └─────────────┘     └─────────────┘     └──────────────────┘
//!        ▲                   │
//!        │                   ▼
//!  (outbound replies) ┌─────────────┐     ┌─────────────┐
//!        └────────────│   Session   │     │    Tools    │
//!                     │   Manager   │     │  Registry   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! Turns for the same session are serialized; different sessions run
//! concurrently.

pub mod compaction;
mod context;
mod r#loop;
mod suppression;

pub use context::{ContextBuilder, RuntimeContext};
pub use r#loop::{AgentLoop, CANCELLED_NOTICE, DIRECT_CHANNEL, DIRECT_CHAT_ID};
pub use suppression::should_suppress_scheduled_error;
