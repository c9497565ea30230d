//! Fixed server texts and outbound message formatting.

use crate::error::ChatError;

/// Server-originated lines, grouped by the moment they are sent.
pub struct Messages;

impl Messages {
    // ── Name negotiation ────────────────────────────────────────────────
    pub const NAME_PROMPT: &str = "Enter your name:";
    pub const NAME_REJECTED: &str = "Name is invalid or already taken. Disconnecting...";

    // ── Private messages ────────────────────────────────────────────────
    pub const INVALID_PRIVATE_FORMAT: &str =
        "Invalid format. Use @<name> <message> to send a private message.";

    // ── Transport ───────────────────────────────────────────────────────
    pub const SERVER_FULL: &str = "Server is full. Try again later.";
    pub const LINE_TOO_LONG: &str = "Line too long. Disconnecting...";

    /// `<sender>: <text>`, as seen by everyone except the sender.
    pub fn broadcast(sender: &str, text: &str) -> String {
        format!("{sender}: {text}")
    }

    /// `[Private] <sender>: <text>`, as seen by the target only.
    pub fn private(sender: &str, text: &str) -> String {
        format!("[Private] {sender}: {text}")
    }

    pub fn joined(name: &str) -> String {
        format!("Server: {name} has joined the chat.")
    }

    pub fn left(name: &str) -> String {
        format!("Server: {name} has left the chat.")
    }

    pub fn unavailable(target: &str) -> String {
        format!("User {target} is not available.")
    }
}

/// Check a candidate display name before it is offered to the registry.
///
/// Names are compared case-sensitively and are otherwise free-form; only the
/// empty name is refused here. Uniqueness is the registry's job.
pub fn validate_name(name: &str) -> Result<(), ChatError> {
    if name.is_empty() {
        return Err(ChatError::InvalidName);
    }
    Ok(())
}
