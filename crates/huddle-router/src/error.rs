//! Error types for the chat router.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors raised by a transport while receiving or sending chat messages.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error on the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (line too long, broken UTF-8)
    #[error("Framing error: {0}")]
    Codec(#[from] LinesCodecError),

    /// An inbound line was not a valid chat message record
    #[error("Malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    /// An outbound message could not be serialized
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The peer went away while a send was in flight
    #[error("Stream closed")]
    Closed,
}

/// Chat router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Transport failure on a client stream
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO error (listener setup, accept)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts_into_router_error() {
        let err: RouterError = TransportError::Closed.into();
        assert!(matches!(err, RouterError::Transport(TransportError::Closed)));
        assert_eq!(err.to_string(), "Transport error: Stream closed");
    }

    #[test]
    fn test_config_error_display() {
        let err = RouterError::config("group sigil must not be whitespace");
        assert!(matches!(err, RouterError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: group sigil must not be whitespace"
        );
    }

    #[test]
    fn test_decode_error_keeps_source() {
        let source = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = TransportError::Decode(source);
        assert!(err.to_string().starts_with("Malformed message:"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
