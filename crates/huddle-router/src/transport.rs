//! Line-delimited JSON transport.
//!
//! Each chat message travels as one JSON object on its own `\n`-terminated
//! line:
//!
//! ```text
//! {"sender":"Alice","recipient":"@team","text":"hi"}
//! ```
//!
//! Blank lines are ignored. A line that is not a valid message, or that
//! exceeds the configured maximum length, is a receive error and ends the
//! client's session.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::connection::{MessageSink, MessageSource};
use crate::types::ChatMessage;
use crate::TransportError;

/// Default maximum length of one encoded message line (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Reads chat messages from line-delimited JSON.
pub struct JsonLinesSource<R> {
    lines: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesSource<R> {
    /// Wrap a reader, rejecting lines longer than `max_line_length` bytes.
    pub fn new(reader: R, max_line_length: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageSource for JsonLinesSource<R> {
    async fn next_message(&mut self) -> Result<Option<ChatMessage>, TransportError> {
        while let Some(line) = self.lines.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let message = serde_json::from_str(&line).map_err(TransportError::Decode)?;
            return Ok(Some(message));
        }
        Ok(None)
    }
}

/// Writes chat messages as line-delimited JSON.
pub struct JsonLinesSink<W> {
    lines: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            lines: FramedWrite::new(writer, LinesCodec::new()),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for JsonLinesSink<W> {
    async fn send_message(&mut self, message: &ChatMessage) -> Result<(), TransportError> {
        let line = serde_json::to_string(message).map_err(TransportError::Encode)?;
        self.lines.send(line).await?;
        Ok(())
    }
}

/// Split a TCP stream into a message source and sink.
pub fn split_tcp(
    stream: TcpStream,
    max_line_length: usize,
) -> (JsonLinesSource<OwnedReadHalf>, JsonLinesSink<OwnedWriteHalf>) {
    let (reader, writer) = stream.into_split();
    (
        JsonLinesSource::new(reader, max_line_length),
        JsonLinesSink::new(writer),
    )
}
