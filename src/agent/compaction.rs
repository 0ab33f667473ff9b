//! History windowing for provider calls.
//!
//! Only the most recent messages of a session are sent to the provider.
//! The cut is moved forward to a user message so the window never opens
//! with a tool result or an assistant tool call whose partner was dropped.
//! Omitted messages are represented by a short deterministic digest.

use crate::session::{Message, Role};
use crate::utils::string::{first_line, preview};

/// Maximum characters of the last omitted request quoted in the digest.
const DIGEST_QUOTE_CHARS: usize = 200;

/// Result of applying the history window.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow {
    /// Messages to send, oldest first.
    pub kept: Vec<Message>,
    /// Number of messages left out.
    pub omitted: usize,
    /// Digest of the omitted messages, `None` when nothing was omitted.
    pub summary: Option<String>,
}

/// Index where the window starts.
fn window_start(messages: &[Message], window: usize) -> usize {
    if messages.len() <= window {
        return 0;
    }
    let cut = messages.len() - window;
    if let Some(offset) = messages[cut..].iter().position(|m| m.role == Role::User) {
        return cut + offset;
    }
    // The tail is one long tool exchange; start at the request that began it.
    messages[..cut]
        .iter()
        .rposition(|m| m.role == Role::User)
        .unwrap_or(cut)
}

/// Digest for `omitted` dropped messages.
///
/// ```
/// use clawgate::agent::compaction::digest;
/// use clawgate::session::Message;
///
/// let dropped = vec![Message::user("plan my trip\nto Kyoto"), Message::assistant("Sure")];
/// assert_eq!(
///     digest(&dropped),
///     "2 earlier messages omitted. Last earlier request: plan my trip"
/// );
/// ```
pub fn digest(omitted: &[Message]) -> String {
    let count = omitted.len();
    let noun = if count == 1 { "message" } else { "messages" };
    let mut text = format!("{} earlier {} omitted", count, noun);
    if let Some(request) = omitted
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| first_line(&m.content))
        .filter(|l| !l.is_empty())
    {
        text.push_str(". Last earlier request: ");
        text.push_str(&preview(request, DIGEST_QUOTE_CHARS));
    }
    text
}

/// Keep the last `window` messages, moved forward to a user message.
///
/// A `window` of 0 disables windowing.
pub fn apply_history_window(messages: &[Message], window: usize) -> HistoryWindow {
    if window == 0 {
        return HistoryWindow {
            kept: messages.to_vec(),
            omitted: 0,
            summary: None,
        };
    }
    let start = window_start(messages, window);
    HistoryWindow {
        kept: messages[start..].to_vec(),
        omitted: start,
        summary: (start > 0).then(|| digest(&messages[..start])),
    }
}
