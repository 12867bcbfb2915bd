//! TCP chat server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::connection::ConnectionActor;
use crate::routing::{Router, RouterConfig};
use crate::transport::{split_tcp, DEFAULT_MAX_LINE_LENGTH};
use crate::RouterError;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:50051";

/// Chat server configuration.
#[derive(Debug, Clone)]
pub struct ChatServerConfig {
    /// Address to listen on (default: 0.0.0.0:50051)
    pub bind_addr: SocketAddr,
    /// Longest accepted inbound line, in bytes
    pub max_line_length: usize,
    /// Routing settings
    pub router: RouterConfig,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            router: RouterConfig::default(),
        }
    }
}

impl ChatServerConfig {
    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.max_line_length == 0 {
            return Err(RouterError::config("max line length must be at least 1"));
        }
        self.router.validate()
    }
}

/// Chat server instance.
///
/// One router is shared by every connection the server accepts.
pub struct ChatServer {
    config: ChatServerConfig,
    listener: TcpListener,
    router: Arc<Router>,
}

impl ChatServer {
    /// Bind the configured address.
    pub async fn bind(config: ChatServerConfig) -> Result<Self, RouterError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Self::from_listener(config, listener)
    }

    /// Build a server over an already bound listener.
    pub fn from_listener(config: ChatServerConfig, listener: TcpListener) -> Result<Self, RouterError> {
        config.validate()?;
        let router = Arc::new(Router::new(config.router.clone()));

        Ok(Self {
            config,
            listener,
            router,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, RouterError> {
        Ok(self.listener.local_addr()?)
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ChatServerConfig {
        &self.config
    }

    /// Get the shared router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Each connection runs on its own task. Connections already accepted
    /// are not interrupted by shutdown.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RouterError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Chat server listening");

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }

            let router = Arc::clone(&self.router);
            let (source, sink) = split_tcp(stream, self.config.max_line_length);

            tokio::spawn(
                async move {
                    info!("Client connected");
                    if let Err(e) = ConnectionActor::handle_connection(router, source, sink).await {
                        warn!(error = %e, "Connection error");
                    }
                }
                .instrument(info_span!(
                    "huddle.connection",
                    peer = %peer_addr,
                    identity = tracing::field::Empty, // Set after the handshake
                )),
            );
        }
    }
}

/// Bind and run a chat server until `shutdown` is cancelled.
pub async fn start(config: ChatServerConfig, shutdown: CancellationToken) -> Result<(), RouterError> {
    ChatServer::bind(config).await?.run(shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatServerConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_line_length, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_line_length_rejected() {
        let config = ChatServerConfig {
            max_line_length: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RouterError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let config = ChatServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = ChatServer::bind(config).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        tokio_test::assert_ok!(server.run(token).await);
    }
}
