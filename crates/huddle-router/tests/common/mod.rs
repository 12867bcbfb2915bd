//! Test utilities for chat routing tests.
//!
//! Provides an in-memory client that drives a real `ConnectionActor` over
//! channels, and a TCP test server with a line-delimited JSON client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use huddle_router::transport::{split_tcp, JsonLinesSink, JsonLinesSource, DEFAULT_MAX_LINE_LENGTH};
use huddle_router::{
    ChatMessage, ChatServer, ChatServerConfig, ConnectionActor, MessageSink, MessageSource, Router,
    RouterConfig, RouterError, TransportError,
};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding nothing else is coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Install a test subscriber so `RUST_LOG` works in failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or the default timeout elapses.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let result = timeout(DEFAULT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "Timed out waiting for {}", what);
}

struct ChannelSource(mpsc::Receiver<ChatMessage>);

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_message(&mut self) -> Result<Option<ChatMessage>, TransportError> {
        Ok(self.0.recv().await)
    }
}

struct ChannelSink(mpsc::UnboundedSender<ChatMessage>);

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send_message(&mut self, message: &ChatMessage) -> Result<(), TransportError> {
        self.0.send(message.clone()).map_err(|_| TransportError::Closed)
    }
}

/// Create a router with default settings.
pub fn router() -> Arc<Router> {
    Arc::new(Router::new(RouterConfig::default()))
}

/// In-memory chat client attached to a router.
pub struct TestClient {
    pub name: String,
    router: Arc<Router>,
    outgoing: Option<mpsc::Sender<ChatMessage>>,
    incoming: mpsc::UnboundedReceiver<ChatMessage>,
    task: JoinHandle<Result<(), RouterError>>,
}

impl TestClient {
    /// Open a stream, send the handshake and wait until registered.
    pub async fn join(router: &Arc<Router>, name: &str) -> Self {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(ConnectionActor::handle_connection(
            Arc::clone(router),
            ChannelSource(out_rx),
            ChannelSink(in_tx),
        ));

        let registered_before = router.sessions().session_count();
        let replaces = router.sessions().is_connected(name);
        out_tx
            .send(ChatMessage::handshake(name))
            .await
            .expect("actor dropped the stream");

        let sessions = Arc::clone(router.sessions());
        let owned = name.to_string();
        if replaces {
            // A takeover keeps the count; wait for the entry to change hands.
            let previous = sessions.lookup(name).map(|entry| entry.session_id);
            wait_for("registration", || {
                sessions.lookup(&owned).map(|entry| entry.session_id) != previous
            })
            .await;
        } else {
            wait_for("registration", || {
                sessions.is_connected(&owned) && sessions.session_count() > registered_before
            })
            .await;
        }

        Self {
            name: name.to_string(),
            router: Arc::clone(router),
            outgoing: Some(out_tx),
            incoming: in_rx,
            task,
        }
    }

    /// Send a message and wait until the router has recorded it.
    pub async fn send(&self, recipient: &str, text: &str) {
        let before = self.router.history().total_messages();
        self.outgoing
            .as_ref()
            .expect("client already left")
            .send(ChatMessage::new(&self.name, recipient, text))
            .await
            .expect("actor dropped the stream");

        let history = Arc::clone(self.router.history());
        wait_for("message to be routed", || history.total_messages() > before).await;
    }

    /// Queue a message on the stream without waiting for it to be routed.
    pub async fn send_nowait(&self, recipient: &str, text: &str) {
        self.outgoing
            .as_ref()
            .expect("client already left")
            .send(ChatMessage::new(&self.name, recipient, text))
            .await
            .expect("actor dropped the stream");
    }

    /// Receive the next delivered message.
    pub async fn recv(&mut self) -> ChatMessage {
        match timeout(DEFAULT_TIMEOUT, self.incoming.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("{}: stream closed while waiting for a message", self.name),
            Err(_) => panic!("{}: timed out waiting for a message", self.name),
        }
    }

    /// Receive `count` messages in delivery order.
    pub async fn recv_many(&mut self, count: usize) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            messages.push(self.recv().await);
        }
        messages
    }

    /// Assert nothing arrives within the quiet period.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(message)) = timeout(QUIET_PERIOD, self.incoming.recv()).await {
            panic!("{}: unexpected message {:?}", self.name, message);
        }
    }

    /// Close the stream and wait for the actor to finish.
    pub async fn leave(mut self) -> Result<(), RouterError> {
        self.outgoing.take();
        timeout(DEFAULT_TIMEOUT, self.task)
            .await
            .expect("timed out waiting for actor")
            .expect("actor panicked")
    }
}

/// Chat server bound to an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub router: Arc<Router>,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), RouterError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_config(RouterConfig::default()).await
    }

    pub async fn start_with_config(router: RouterConfig) -> Self {
        let config = ChatServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            router,
            ..Default::default()
        };
        let server = ChatServer::bind(config).await.expect("failed to bind test server");
        let addr = server.local_addr().expect("no local address");
        let router = Arc::clone(server.router());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        Self {
            addr,
            router,
            shutdown,
            task,
        }
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn stop(self) -> Result<(), RouterError> {
        self.shutdown.cancel();
        timeout(DEFAULT_TIMEOUT, self.task)
            .await
            .expect("timed out waiting for server")
            .expect("server task panicked")
    }
}

/// Line-delimited JSON client over TCP.
pub struct TcpClient {
    pub name: String,
    source: JsonLinesSource<OwnedReadHalf>,
    sink: JsonLinesSink<OwnedWriteHalf>,
}

impl TcpClient {
    /// Connect and send the handshake, waiting until the server registers it.
    pub async fn join(server: &TestServer, name: &str) -> Self {
        let stream = TcpStream::connect(server.addr).await.expect("failed to connect");
        let (source, mut sink) = split_tcp(stream, DEFAULT_MAX_LINE_LENGTH);
        sink.send_message(&ChatMessage::handshake(name))
            .await
            .expect("failed to send handshake");

        let sessions = Arc::clone(server.router.sessions());
        let owned = name.to_string();
        wait_for("registration", || sessions.is_connected(&owned)).await;

        Self {
            name: name.to_string(),
            source,
            sink,
        }
    }

    pub async fn send(&mut self, recipient: &str, text: &str) {
        self.sink
            .send_message(&ChatMessage::new(&self.name, recipient, text))
            .await
            .expect("failed to send message");
    }

    pub async fn recv(&mut self) -> ChatMessage {
        match timeout(DEFAULT_TIMEOUT, self.source.next_message()).await {
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => panic!("{}: server closed the stream", self.name),
            Ok(Err(e)) => panic!("{}: receive error: {}", self.name, e),
            Err(_) => panic!("{}: timed out waiting for a message", self.name),
        }
    }
}
