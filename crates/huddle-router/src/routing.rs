//! Message routing for chat sessions.
//!
//! The `Router` owns the three shared tables (sessions, groups, history)
//! and implements the per-message dispatch algorithm.
//!
//! # Routing Logic
//!
//! For every message after a client's handshake, the router:
//! 1. Normalizes the recipient into a destination key (empty = broadcast)
//! 2. Appends the message to that key's history
//! 3. If the text is `/history`, replays that key's history to the sender
//!    and stops
//! 4. Otherwise classifies the recipient and delivers:
//!    - broadcast: every registered client except the sender
//!    - group: records the sender as a member, then every registered
//!      member except the sender
//!    - direct: the recipient's session, if registered
//!
//! Registration and dispatch run under one router-wide lock, so a client
//! joining never observes half of a dispatch: each message either lands in
//! its join-time replay or is delivered live, never both. Nothing under the
//! lock waits on a peer: deliveries are queued with `try_send`, and items
//! for a full queue are finished after the lock is released, waiting up to
//! `delivery_timeout` for the recipient to make room. The sender's next
//! message is not dispatched until then, so per-recipient order holds.
//!
//! # Example
//!
//! ```ignore
//! use huddle_router::{ChatMessage, Router, RouterConfig};
//!
//! let router = Router::new(RouterConfig::default());
//! let (tx, rx) = tokio::sync::mpsc::channel(router.config().outbound_capacity);
//! let alice = router.register("Alice".to_string(), tx).await;
//!
//! router.dispatch(&alice, ChatMessage::new("Alice", "", "hi")).await;
//! assert_eq!(router.history_of("").len(), 1);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::groups::GroupDirectory;
use crate::history::HistoryStore;
use crate::metrics;
use crate::registry::{
    try_enqueue, Delivery, Outbound, PendingDelivery, SendResult, SessionEntry, SessionId,
    SessionRegistry,
};
use crate::types::{ChatMessage, Destination, DestinationKey, Identity, DEFAULT_GROUP_SIGIL};
use crate::RouterError;

/// Default capacity of each session's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default time to wait for room in a full outbound queue.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Character that marks a recipient as a group tag
    pub group_sigil: char,
    /// Capacity of each session's outbound queue
    pub outbound_capacity: usize,
    /// How long a delivery waits for room in a full queue before it is
    /// dropped
    pub delivery_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            group_sigil: DEFAULT_GROUP_SIGIL,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

impl RouterConfig {
    /// Set a custom group sigil.
    pub fn with_group_sigil(mut self, sigil: char) -> Self {
        self.group_sigil = sigil;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the delivery timeout for full queues.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.group_sigil.is_whitespace() {
            return Err(RouterError::config("group sigil must not be whitespace"));
        }
        if self.outbound_capacity == 0 {
            return Err(RouterError::config("outbound capacity must be at least 1"));
        }
        if self.delivery_timeout.is_zero() {
            return Err(RouterError::config("delivery timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// A registered stream, as seen by the router.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    identity: Identity,
    session_id: SessionId,
    outbound: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    /// Identity announced in the handshake.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Id of the stream that registered.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queue an item directly on this stream, bypassing the registry.
    fn reply(&self, item: Outbound) -> Delivery {
        try_enqueue(&self.identity, &self.outbound, item)
    }
}

/// Per-recipient tally for a fan-out delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients the message was queued for
    pub delivered: usize,
    /// Group members skipped because they are not registered
    pub skipped: usize,
    /// Recipients whose queue was closed, or stayed full past the delivery
    /// timeout
    pub failed: usize,
}

impl DeliveryReport {
    fn record(&mut self, identity: &str, result: SendResult) {
        match result {
            SendResult::Sent => self.delivered += 1,
            SendResult::NotConnected => self.skipped += 1,
            SendResult::ChannelFull | SendResult::ChannelClosed => {
                warn!(to = %identity, reason = result.as_str(), "Failed to deliver message");
                metrics::record_delivery_failure(result.as_str());
                self.failed += 1;
            }
        }
    }
}

/// What happened to one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A `/history` request; the key's history was queued for the sender
    HistoryReplayed {
        /// Key whose history was replayed
        key: DestinationKey,
        /// Number of messages replayed, including the request itself
        entries: usize,
        /// Whether the replay reached the sender's queue
        result: SendResult,
    },
    /// Sent to every other registered client
    Broadcast(DeliveryReport),
    /// Sent to the other registered members of a group
    Group {
        /// Group tag
        group: String,
        /// Whether the sender just became a member
        joined: bool,
        /// Delivery tally
        report: DeliveryReport,
    },
    /// Sent to a single identity
    Direct {
        /// Addressed identity
        recipient: Identity,
        /// `NotConnected` means the recipient was not found
        result: SendResult,
    },
}

impl DispatchOutcome {
    fn kind(&self) -> &'static str {
        match self {
            DispatchOutcome::HistoryReplayed { .. } => "history",
            DispatchOutcome::Broadcast(_) => "broadcast",
            DispatchOutcome::Group { .. } => "group",
            DispatchOutcome::Direct { .. } => "direct",
        }
    }

    /// Fold in the result of a delivery that waited for queue room.
    fn record_deferred(&mut self, identity: &str, result: SendResult) {
        match self {
            DispatchOutcome::Broadcast(report) | DispatchOutcome::Group { report, .. } => {
                report.record(identity, result)
            }
            DispatchOutcome::HistoryReplayed { result: slot, .. }
            | DispatchOutcome::Direct { result: slot, .. } => {
                if !result.is_sent() {
                    warn!(to = %identity, reason = result.as_str(), "Failed to deliver message");
                    metrics::record_delivery_failure(result.as_str());
                }
                *slot = result;
            }
        }
    }
}

/// Split a delivery into its immediate result, parking it if it must wait.
fn settle(delivery: Delivery, pending: &mut Vec<PendingDelivery>) -> Option<SendResult> {
    match delivery {
        Delivery::Done(result) => Some(result),
        Delivery::Pending(item) => {
            pending.push(item);
            None
        }
    }
}

/// Chat message router.
///
/// Tables are shared through `Arc`s so several routers can be built over
/// independent tables (tests do this), or one set of tables can be
/// inspected while a router is live.
pub struct Router {
    config: RouterConfig,
    sessions: Arc<SessionRegistry>,
    groups: Arc<GroupDirectory>,
    history: Arc<HistoryStore>,
    /// Serializes registration, deregistration and dispatch.
    dispatch_lock: Mutex<()>,
}

impl Router {
    /// Create a router over fresh, empty tables.
    pub fn new(config: RouterConfig) -> Self {
        Self::with_tables(
            config,
            Arc::new(SessionRegistry::new()),
            Arc::new(GroupDirectory::new()),
            Arc::new(HistoryStore::new()),
        )
    }

    /// Create a router over the given tables.
    pub fn with_tables(
        config: RouterConfig,
        sessions: Arc<SessionRegistry>,
        groups: Arc<GroupDirectory>,
        history: Arc<HistoryStore>,
    ) -> Self {
        info!(
            group_sigil = %config.group_sigil,
            outbound_capacity = config.outbound_capacity,
            delivery_timeout_ms = config.delivery_timeout.as_millis() as u64,
            "Router initialized"
        );

        Self {
            config,
            sessions,
            groups,
            history,
            dispatch_lock: Mutex::new(()),
        }
    }

    /// Get the router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Get the session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Get the group directory.
    pub fn groups(&self) -> &Arc<GroupDirectory> {
        &self.groups
    }

    /// Get the history store.
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Register a stream under `identity`.
    ///
    /// Any history recorded under the identity is queued on `outbound` as
    /// one replay batch before the session becomes reachable, so it always
    /// precedes live traffic. An identity that is already registered is
    /// taken over silently.
    #[instrument(skip(self, outbound), fields(identity = %identity))]
    pub async fn register(
        &self,
        identity: Identity,
        outbound: mpsc::Sender<Outbound>,
    ) -> SessionHandle {
        let _guard = self.dispatch_lock.lock().await;

        let backlog = self.history.get(&DestinationKey::Named(identity.clone()));
        let replayed = backlog.len();
        if !backlog.is_empty() {
            if let Err(e) = outbound.try_send(Outbound::Replay(backlog)) {
                warn!(error = %e, "Failed to queue join replay");
            }
        }

        let entry = SessionEntry::new(outbound.clone());
        let handle = SessionHandle {
            identity,
            session_id: entry.session_id,
            outbound,
        };
        self.sessions.register(handle.identity.clone(), entry);
        metrics::record_registration(self.sessions.session_count());

        info!(
            session = %handle.session_id,
            replayed = replayed,
            "Client joined"
        );
        handle
    }

    /// Remove a stream's registration.
    ///
    /// A stream that has already been replaced under its identity leaves
    /// the newer registration in place. Group membership and history are
    /// kept. Returns true if the registration was removed.
    #[instrument(skip(self, session), fields(identity = %session.identity))]
    pub async fn deregister(&self, session: &SessionHandle) -> bool {
        let _guard = self.dispatch_lock.lock().await;

        let removed = self
            .sessions
            .remove_session(&session.identity, session.session_id);
        metrics::record_active_sessions(self.sessions.session_count());

        if removed {
            info!("Client removed");
        } else {
            debug!("Client was already replaced; registration left in place");
        }
        removed
    }

    /// Route one message received from `session`.
    #[instrument(
        skip(self, session, message),
        fields(from = %message.sender, to = %message.recipient)
    )]
    pub async fn dispatch(&self, session: &SessionHandle, message: ChatMessage) -> DispatchOutcome {
        let started = Instant::now();
        let key = message.destination_key();

        let mut pending = Vec::new();
        let mut outcome = {
            let _guard = self.dispatch_lock.lock().await;

            self.history.append(key.clone(), message.clone());

            if message.is_history_request() {
                let entries = self.history.get(&key);
                let count = entries.len();
                let result = match session.reply(Outbound::Replay(entries)) {
                    Delivery::Done(result) => {
                        if !result.is_sent() {
                            warn!(reason = result.as_str(), "Failed to queue history replay");
                            metrics::record_delivery_failure(result.as_str());
                        }
                        result
                    }
                    // Settled by `record_deferred` once the queue has room.
                    Delivery::Pending(item) => {
                        pending.push(item);
                        SendResult::ChannelFull
                    }
                };
                DispatchOutcome::HistoryReplayed {
                    key,
                    entries: count,
                    result,
                }
            } else {
                match Destination::classify(&message.recipient, self.config.group_sigil) {
                    Destination::Broadcast => {
                        DispatchOutcome::Broadcast(self.broadcast_to_all(&message, &mut pending))
                    }
                    Destination::Group(group) => {
                        let joined = self.groups.ensure_member(&group, &message.sender);
                        let report = self.broadcast_to_group(&group, &message, &mut pending);
                        DispatchOutcome::Group {
                            group,
                            joined,
                            report,
                        }
                    }
                    Destination::Direct(recipient) => {
                        let result = self.send_direct(&recipient, &message, &mut pending);
                        DispatchOutcome::Direct { recipient, result }
                    }
                }
            }
        };

        if !pending.is_empty() {
            let timeout = self.config.delivery_timeout;
            debug!(waiting = pending.len(), "Waiting for room in full outbound queues");
            let settled = join_all(pending.into_iter().map(|item| async move {
                let identity = item.identity().to_string();
                (identity, item.complete(timeout).await)
            }))
            .await;
            for (identity, result) in settled {
                outcome.record_deferred(&identity, result);
            }
        }

        let kind = outcome.kind();
        metrics::record_routed(kind);
        metrics::record_dispatch_latency(started.elapsed().as_secs_f64() * 1000.0, kind);
        debug!(kind = kind, outcome = ?outcome, "Message routed");

        outcome
    }

    /// Messages recorded for a recipient string.
    ///
    /// The empty string addresses broadcast history.
    pub fn history_of(&self, recipient: &str) -> Vec<ChatMessage> {
        self.history.get(&DestinationKey::for_recipient(recipient))
    }

    /// Members of a group, in join order.
    pub fn group_members(&self, group: &str) -> Vec<Identity> {
        self.groups.members(group)
    }

    /// Identities currently registered.
    pub fn connected_identities(&self) -> Vec<Identity> {
        self.sessions.identities()
    }

    fn broadcast_to_all(
        &self,
        message: &ChatMessage,
        pending: &mut Vec<PendingDelivery>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for identity in self.sessions.identities() {
            if identity == message.sender {
                continue;
            }
            let delivery = self
                .sessions
                .deliver(&identity, Outbound::Message(message.clone()));
            if let Some(result) = settle(delivery, pending) {
                report.record(&identity, result);
            }
        }
        report
    }

    fn broadcast_to_group(
        &self,
        group: &str,
        message: &ChatMessage,
        pending: &mut Vec<PendingDelivery>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for member in self.groups.members(group) {
            if member == message.sender {
                continue;
            }
            let delivery = self
                .sessions
                .deliver(&member, Outbound::Message(message.clone()));
            match settle(delivery, pending) {
                Some(SendResult::NotConnected) => {
                    debug!(group = %group, member = %member, "Group member offline, skipping");
                    report.record(&member, SendResult::NotConnected);
                }
                Some(result) => report.record(&member, result),
                None => {}
            }
        }
        report
    }

    fn send_direct(
        &self,
        recipient: &str,
        message: &ChatMessage,
        pending: &mut Vec<PendingDelivery>,
    ) -> SendResult {
        let delivery = self
            .sessions
            .deliver(recipient, Outbound::Message(message.clone()));
        // A parked delivery is settled by `record_deferred`.
        let Some(result) = settle(delivery, pending) else {
            return SendResult::ChannelFull;
        };
        match result {
            SendResult::Sent => {}
            SendResult::NotConnected => {
                warn!(recipient = %recipient, "Recipient not found");
                metrics::record_delivery_failure("recipient_not_found");
            }
            SendResult::ChannelFull | SendResult::ChannelClosed => {
                warn!(recipient = %recipient, reason = result.as_str(), "Failed to deliver private message");
                metrics::record_delivery_failure(result.as_str());
            }
        }
        result
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("groups", &self.groups)
            .field("history", &self.history)
            .finish()
    }
}
