//! History Store.
//!
//! Keeps every routed message, grouped by destination key, for the
//! lifetime of the process. History is replayed to clients when they
//! (re)join under an identity that has recorded messages, and on explicit
//! `/history` requests.

use std::fmt;

use dashmap::DashMap;

use crate::types::{ChatMessage, DestinationKey};

/// In-memory message history, never pruned.
pub struct HistoryStore {
    entries: DashMap<DestinationKey, Vec<ChatMessage>>,
}

impl HistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Append a message to the end of `key`'s history.
    pub fn append(&self, key: DestinationKey, message: ChatMessage) {
        self.entries.entry(key).or_default().push(message);
    }

    /// Full history recorded under `key`, oldest first.
    pub fn get(&self, key: &DestinationKey) -> Vec<ChatMessage> {
        self.entries
            .get(key)
            .map(|messages| messages.value().clone())
            .unwrap_or_default()
    }

    /// Number of messages recorded under `key`.
    pub fn len(&self, key: &DestinationKey) -> usize {
        self.entries
            .get(key)
            .map(|messages| messages.len())
            .unwrap_or(0)
    }

    /// Whether nothing has been recorded under `key`.
    pub fn is_empty(&self, key: &DestinationKey) -> bool {
        self.len(key) == 0
    }

    /// Every key with recorded history, sorted (broadcast first).
    pub fn destinations(&self) -> Vec<DestinationKey> {
        let mut keys: Vec<DestinationKey> =
            self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Total number of recorded messages across all destinations.
    pub fn total_messages(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStore")
            .field("destination_count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> DestinationKey {
        DestinationKey::Named(name.to_string())
    }

    #[test]
    fn test_empty_history() {
        let store = HistoryStore::new();
        assert!(store.get(&named("Alice")).is_empty());
        assert!(store.is_empty(&DestinationKey::Broadcast));
        assert_eq!(store.total_messages(), 0);
    }

    #[test]
    fn test_append_preserves_order() {
        let store = HistoryStore::new();
        store.append(named("Alice"), ChatMessage::new("Bob", "Alice", "Hey Alice!"));
        store.append(named("Alice"), ChatMessage::new("Carol", "Alice", "Hello!"));
        store.append(named("Alice"), ChatMessage::new("Bob", "Alice", "Still there?"));

        let history = store.get(&named("Alice"));
        assert_eq!(store.len(&named("Alice")), 3);
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Hey Alice!", "Hello!", "Still there?"]);
    }

    #[test]
    fn test_destinations_are_separate() {
        let store = HistoryStore::new();
        store.append(DestinationKey::Broadcast, ChatMessage::new("Alice", "", ""));
        store.append(named("@group1"), ChatMessage::new("Bob", "@group1", "Group message"));
        store.append(named("InvalidUser"), ChatMessage::new("Alice", "InvalidUser", "Hello?"));

        assert_eq!(store.len(&DestinationKey::Broadcast), 1);
        assert_eq!(store.get(&DestinationKey::Broadcast)[0].text, "");
        assert_eq!(store.get(&named("@group1"))[0].text, "Group message");
        assert_eq!(store.get(&named("InvalidUser"))[0].text, "Hello?");
        assert_eq!(store.total_messages(), 3);
        assert_eq!(
            store.destinations(),
            vec![
                DestinationKey::Broadcast,
                named("@group1"),
                named("InvalidUser"),
            ]
        );
    }

    #[test]
    fn test_sentinel_name_does_not_collide_with_broadcast() {
        let store = HistoryStore::new();
        store.append(named("broadcast"), ChatMessage::new("Alice", "broadcast", "dm"));

        assert!(store.is_empty(&DestinationKey::Broadcast));
        assert_eq!(store.len(&named("broadcast")), 1);
    }
}
