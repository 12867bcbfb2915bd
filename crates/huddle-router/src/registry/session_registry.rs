//! Session Registry implementation.
//!
//! Tracks registered chat sessions by identity for message routing.

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::types::{ChatMessage, Identity};

/// Unique id of one connected stream.
///
/// Two streams registering the same identity get different session ids, so
/// a stale stream can be told apart from the one that replaced it.
pub type SessionId = Uuid;

/// An item queued for delivery to a session's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A single routed message
    Message(ChatMessage),
    /// A batch of history, written to the stream in order
    Replay(Vec<ChatMessage>),
}

impl Outbound {
    /// Number of chat messages carried by this item.
    pub fn message_count(&self) -> usize {
        match self {
            Outbound::Message(_) => 1,
            Outbound::Replay(messages) => messages.len(),
        }
    }
}

/// Registry entry for one live session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Id of the stream that owns this entry
    pub session_id: SessionId,
    /// Channel to the session's writer task
    pub sender: mpsc::Sender<Outbound>,
}

impl SessionEntry {
    /// Create an entry with a fresh session id.
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            sender,
        }
    }
}

/// Result of attempting to deliver to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Queued for delivery
    Sent,
    /// No session is registered under that identity
    NotConnected,
    /// The session's queue stayed full past the delivery timeout; the item
    /// was dropped
    ChannelFull,
    /// The session's writer has stopped
    ChannelClosed,
}

impl SendResult {
    /// Whether the item was queued.
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent)
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SendResult::Sent => "sent",
            SendResult::NotConnected => "not_connected",
            SendResult::ChannelFull => "channel_full",
            SendResult::ChannelClosed => "channel_closed",
        }
    }
}

/// Outcome of a non-blocking delivery attempt.
#[derive(Debug)]
pub enum Delivery {
    /// Settled without waiting
    Done(SendResult),
    /// The queue was full; settle with [`PendingDelivery::complete`]
    Pending(PendingDelivery),
}

/// An item waiting for room in a full session queue.
#[derive(Debug)]
pub struct PendingDelivery {
    identity: Identity,
    sender: mpsc::Sender<Outbound>,
    item: Outbound,
}

impl PendingDelivery {
    /// Identity the item is addressed to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Wait up to `timeout` for room in the queue.
    ///
    /// Must not be awaited while holding the router's dispatch lock.
    pub async fn complete(self, timeout: Duration) -> SendResult {
        match self.sender.send_timeout(self.item, timeout).await {
            Ok(()) => SendResult::Sent,
            Err(SendTimeoutError::Timeout(_)) => {
                debug!(
                    identity = %self.identity,
                    timeout_ms = timeout.as_millis() as u64,
                    "Outbound queue stayed full"
                );
                SendResult::ChannelFull
            }
            Err(SendTimeoutError::Closed(_)) => SendResult::ChannelClosed,
        }
    }
}

/// Queue `item` on `sender` without waiting, handing it back if the queue
/// is full.
pub(crate) fn try_enqueue(identity: &str, sender: &mpsc::Sender<Outbound>, item: Outbound) -> Delivery {
    match sender.try_send(item) {
        Ok(()) => Delivery::Done(SendResult::Sent),
        Err(TrySendError::Full(item)) => {
            debug!(identity = %identity, "Outbound queue full, deferring delivery");
            Delivery::Pending(PendingDelivery {
                identity: identity.to_string(),
                sender: sender.clone(),
                item,
            })
        }
        Err(TrySendError::Closed(_)) => {
            debug!(identity = %identity, "Outbound queue closed");
            Delivery::Done(SendResult::ChannelClosed)
        }
    }
}

/// Registry of live chat sessions.
///
/// Maps identities to the outbound queue of the stream that registered
/// them. Registering an identity that is already present replaces the
/// previous entry without notifying its owner.
pub struct SessionRegistry {
    sessions: DashMap<Identity, SessionEntry>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        debug!("Creating session registry");
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Install or overwrite the session for `identity`.
    ///
    /// Returns the entry that was displaced, if any.
    #[instrument(skip(self, entry), fields(identity = %identity, session = %entry.session_id))]
    pub fn register(&self, identity: Identity, entry: SessionEntry) -> Option<SessionEntry> {
        let existing = self.sessions.insert(identity, entry);
        if existing.is_some() {
            info!("Replaced existing session registration");
        } else {
            debug!("Registered new session");
        }
        existing
    }

    /// Remove the session for `identity`, whoever owns it.
    #[instrument(skip(self))]
    pub fn remove(&self, identity: &str) -> Option<SessionEntry> {
        let removed = self.sessions.remove(identity).map(|(_, entry)| entry);
        if removed.is_none() {
            debug!("Session was not registered");
        }
        removed
    }

    /// Remove the session for `identity` only if `session_id` still owns it.
    ///
    /// Returns true if an entry was removed.
    #[instrument(skip(self))]
    pub fn remove_session(&self, identity: &str, session_id: SessionId) -> bool {
        let removed = self
            .sessions
            .remove_if(identity, |_, entry| entry.session_id == session_id)
            .is_some();
        if !removed {
            debug!("Session already replaced or removed");
        }
        removed
    }

    /// Look up the current session for `identity`.
    pub fn lookup(&self, identity: &str) -> Option<SessionEntry> {
        self.sessions.get(identity).map(|entry| entry.value().clone())
    }

    /// Check whether `identity` is registered.
    pub fn is_connected(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// All registered identities, sorted.
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> =
            self.sessions.iter().map(|entry| entry.key().clone()).collect();
        identities.sort();
        identities
    }

    /// Queue an item for `identity` without waiting.
    ///
    /// A full queue yields [`Delivery::Pending`] carrying the item.
    pub fn deliver(&self, identity: &str, item: Outbound) -> Delivery {
        let sender = match self.sessions.get(identity) {
            Some(entry) => entry.value().sender.clone(),
            None => return Delivery::Done(SendResult::NotConnected),
        };

        try_enqueue(identity, &sender, item)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}
