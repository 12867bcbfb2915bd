//! Core message and addressing types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A client's login handle, which doubles as its routing address.
///
/// Identities are opaque and case-sensitive.
pub type Identity = String;

/// Marker that turns a recipient string into a group tag.
pub const DEFAULT_GROUP_SIGIL: char = '@';

/// Message text that requests a replay of the destination's history.
pub const HISTORY_COMMAND: &str = "/history";

/// A chat message as it travels on the wire.
///
/// `recipient` is empty for a broadcast, a group tag when it contains the
/// group sigil, and an identity otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    /// Identity of the client that sent the message
    pub sender: String,
    /// Broadcast (empty), group tag, or identity
    pub recipient: String,
    /// Message body
    pub text: String,
}

impl ChatMessage {
    /// Create a new message.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            text: text.into(),
        }
    }

    /// Build the first message a client sends to announce its identity.
    pub fn handshake(identity: impl Into<String>) -> Self {
        Self::new(identity, "", "")
    }

    /// Whether this message asks for a history replay.
    pub fn is_history_request(&self) -> bool {
        self.text == HISTORY_COMMAND
    }

    /// The history key this message is recorded under.
    pub fn destination_key(&self) -> DestinationKey {
        DestinationKey::for_recipient(&self.recipient)
    }
}

/// Key under which message history is grouped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DestinationKey {
    /// Messages sent with an empty recipient
    Broadcast,
    /// Messages sent to an identity or a group tag
    Named(String),
}

impl DestinationKey {
    /// Normalize a recipient string into a history key.
    pub fn for_recipient(recipient: &str) -> Self {
        if recipient.is_empty() {
            DestinationKey::Broadcast
        } else {
            DestinationKey::Named(recipient.to_string())
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKey::Broadcast => write!(f, "*broadcast*"),
            DestinationKey::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Where a message is delivered.
///
/// Classification is purely lexical: any recipient containing the group
/// sigil is a group, so an identity that happens to contain the sigil can
/// never be addressed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Every registered client except the sender
    Broadcast,
    /// Every registered member of the group except the sender
    Group(String),
    /// A single identity
    Direct(String),
}

impl Destination {
    /// Classify a recipient string.
    pub fn classify(recipient: &str, sigil: char) -> Self {
        if recipient.is_empty() {
            Destination::Broadcast
        } else if recipient.contains(sigil) {
            Destination::Group(recipient.to_string())
        } else {
            Destination::Direct(recipient.to_string())
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Destination::Broadcast => "broadcast",
            Destination::Group(_) => "group",
            Destination::Direct(_) => "direct",
        }
    }
}

/// Lifecycle of a single client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the handshake message
    Unregistered,
    /// Identity registered, routing messages
    Registered,
    /// Stream ended; identity deregistered
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_empty_is_broadcast() {
        assert_eq!(Destination::classify("", '@'), Destination::Broadcast);
    }

    #[test]
    fn test_classify_sigil_anywhere_is_group() {
        assert_eq!(
            Destination::classify("@team", '@'),
            Destination::Group("@team".to_string())
        );
        assert_eq!(
            Destination::classify("team@", '@'),
            Destination::Group("team@".to_string())
        );
    }

    #[test]
    fn test_classify_plain_name_is_direct() {
        assert_eq!(
            Destination::classify("Bob", '@'),
            Destination::Direct("Bob".to_string())
        );
    }

    #[test]
    fn test_classify_username_with_sigil_is_misread_as_group() {
        // Lexical classification cannot tell these apart.
        let dest = Destination::classify("bob@example.com", '@');
        assert_eq!(dest.kind(), "group");
    }

    #[test]
    fn test_classify_custom_sigil() {
        assert_eq!(
            Destination::classify("#ops", '#'),
            Destination::Group("#ops".to_string())
        );
        assert_eq!(
            Destination::classify("@ops", '#'),
            Destination::Direct("@ops".to_string())
        );
    }

    #[test]
    fn test_destination_key_normalization() {
        assert_eq!(DestinationKey::for_recipient(""), DestinationKey::Broadcast);
        assert_eq!(
            DestinationKey::for_recipient("broadcast"),
            DestinationKey::Named("broadcast".to_string())
        );
        assert_eq!(DestinationKey::Broadcast.to_string(), "*broadcast*");
    }

    #[test]
    fn test_history_request_detection() {
        assert!(ChatMessage::new("Alice", "", "/history").is_history_request());
        assert!(!ChatMessage::new("Alice", "", "/history ").is_history_request());
        assert!(!ChatMessage::new("Alice", "", "hi").is_history_request());
    }

    #[test]
    fn test_wire_shape() {
        let msg = ChatMessage::new("Alice", "@team", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"sender": "Alice", "recipient": "@team", "text": "hi"})
        );
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let msg: ChatMessage = serde_json::from_str(r#"{"sender":"Bob"}"#).unwrap();
        assert_eq!(msg, ChatMessage::handshake("Bob"));
    }
}
