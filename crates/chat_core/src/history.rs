//! crates/chat_core/src/history.rs
//!
//! Selects which stored messages are replayed to the assistant.

use crate::domain::Message;

/// Default number of prior messages replayed to the assistant.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Returns the most recent `limit` messages of `messages`, oldest first.
///
/// `messages` must already be in conversation order.
pub fn context_window(messages: &[Message], limit: usize) -> &[Message] {
    let start = messages.len().saturating_sub(limit);
    &messages[start..]
}

/// Returns the messages that precede the message with id `message_id`.
///
/// The chat flow saves the user's message before calling the assistant, so the
/// prompt itself and anything stored after it (a concurrent turn on the same
/// conversation) are left out. Unknown ids yield the whole slice.
pub fn history_before(messages: &[Message], message_id: i64) -> &[Message] {
    match messages.iter().position(|m| m.id == message_id) {
        Some(index) => &messages[..index],
        None => messages,
    }
}
