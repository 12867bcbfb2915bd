//! Connection actor for handling individual chat client streams.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::registry::Outbound;
use crate::routing::{Router, SessionHandle};
use crate::types::{ChatMessage, ConnectionState};
use crate::{RouterError, TransportError};

/// Receiving half of a client stream.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the client has closed the stream cleanly.
    async fn next_message(&mut self) -> Result<Option<ChatMessage>, TransportError>;
}

/// Sending half of a client stream.
#[async_trait]
pub trait MessageSink: Send {
    /// Write one message to the client.
    async fn send_message(&mut self, message: &ChatMessage) -> Result<(), TransportError>;
}

/// Actor managing a single chat client stream.
pub struct ConnectionActor<R, W> {
    source: R,
    sink: Option<W>,
    state: ConnectionState,
    router: Arc<Router>,
}

impl<R, W> ConnectionActor<R, W>
where
    R: MessageSource,
    W: MessageSink + 'static,
{
    /// Handle a stream until it closes.
    ///
    /// A clean close returns `Ok(())`; a receive error is returned after the
    /// client has been deregistered.
    pub async fn handle_connection(router: Arc<Router>, source: R, sink: W) -> Result<(), RouterError> {
        let mut actor = Self {
            source,
            sink: Some(sink),
            state: ConnectionState::Unregistered,
            router,
        };

        actor.run().await
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, "Connection state change");
        self.state = next;
    }

    async fn run(&mut self) -> Result<(), RouterError> {
        // The first message only announces the identity.
        let handshake = match self.source.next_message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Stream closed before handshake");
                self.transition(ConnectionState::Closed);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Error receiving handshake");
                self.transition(ConnectionState::Closed);
                return Err(e.into());
            }
        };

        let identity = handshake.sender;
        if identity.is_empty() {
            warn!("Client registered with an empty identity");
        }
        tracing::Span::current().record("identity", identity.as_str());

        let sink = self
            .sink
            .take()
            .ok_or_else(|| RouterError::internal("connection already started"))?;
        let (tx, rx) = mpsc::channel(self.router.config().outbound_capacity);
        let writer = spawn_writer(identity.clone(), sink, rx);

        let session = self.router.register(identity, tx).await;
        self.transition(ConnectionState::Registered);

        let result = self.process_messages(&session).await;

        self.router.deregister(&session).await;
        self.transition(ConnectionState::Closed);

        // Dropping the last sender lets the writer drain and finish.
        drop(session);
        match writer.await {
            Ok(0) => {}
            Ok(undelivered) => debug!(undelivered, "Writer stopped early"),
            Err(e) => warn!(error = %e, "Writer task failed"),
        }

        info!("Connection closed");
        result
    }

    async fn process_messages(
        &mut self,
        session: &SessionHandle,
    ) -> Result<(), RouterError> {
        loop {
            match self.source.next_message().await {
                Ok(Some(message)) => {
                    debug!(from = %message.sender, text = %message.text, "Message received");
                    self.router.dispatch(session, message).await;
                }
                Ok(None) => {
                    info!(identity = %session.identity(), "Client disconnected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(identity = %session.identity(), error = %e, "Error receiving message");
                    return Err(e.into());
                }
            }
        }
    }
}

/// Spawn the task that writes queued items to the client.
///
/// The task ends when every sender is dropped or the sink fails. After a
/// sink failure the queue is closed, so further deliveries report
/// `ChannelClosed`, and everything already queued is counted as a delivery
/// failure. Resolves to the number of messages that were not written.
fn spawn_writer<W>(identity: String, mut sink: W, mut rx: mpsc::Receiver<Outbound>) -> JoinHandle<usize>
where
    W: MessageSink + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let count = item.message_count();
            if let Err(e) = write_item(&mut sink, item).await {
                warn!(identity = %identity, error = %e, "Error sending to client");
                rx.close();

                // A replay that failed part way counts in full.
                let mut undelivered = count;
                while let Some(item) = rx.recv().await {
                    undelivered += item.message_count();
                }
                metrics::record_delivery_failures("sink_error", undelivered);
                warn!(identity = %identity, undelivered, "Dropped queued messages after send failure");
                return undelivered;
            }
        }
        debug!(identity = %identity, "Writer finished");
        0
    })
}

#[instrument(level = "trace", skip_all)]
async fn write_item<W: MessageSink>(sink: &mut W, item: Outbound) -> Result<(), TransportError> {
    match item {
        Outbound::Message(message) => sink.send_message(&message).await,
        Outbound::Replay(messages) => {
            for message in &messages {
                sink.send_message(message).await?;
            }
            Ok(())
        }
    }
}
