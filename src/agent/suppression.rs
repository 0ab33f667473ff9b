//! Suppression of known-noisy errors in scheduled turns.
//!
//! Scheduled jobs on Feishu routinely trip the working-directory guard.
//! Nobody is watching those chats when the job fires, so the error is kept
//! away from the user; the LLM still sees it.

use crate::tools::ToolOutput;

const SUPPRESSED_CHANNEL: &str = "feishu";
const SUPPRESSED_ERROR: &str = "Command blocked by safety guard (path outside working dir)";

/// Whether a scheduled turn's tool output must not reach the user.
///
/// True only for an error on `feishu` whose text is exactly the
/// working-directory guard message (surrounding whitespace ignored).
///
/// ```
/// use clawgate::agent::should_suppress_scheduled_error;
/// use clawgate::tools::ToolOutput;
///
/// let blocked = ToolOutput::error("Command blocked by safety guard (path outside working dir)");
/// assert!(should_suppress_scheduled_error("feishu", Some(&blocked)));
/// assert!(!should_suppress_scheduled_error("telegram", Some(&blocked)));
/// assert!(!should_suppress_scheduled_error("feishu", None));
/// ```
pub fn should_suppress_scheduled_error(channel: &str, output: Option<&ToolOutput>) -> bool {
    match output {
        Some(out) => {
            channel == SUPPRESSED_CHANNEL && out.is_error && out.for_llm.trim() == SUPPRESSED_ERROR
        }
        None => false,
    }
}
