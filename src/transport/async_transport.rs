//! Async transport implementation using tokio

use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{ChannelError, codec};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stateless client for one-shot requests against the mailbox
#[derive(Debug, Clone)]
pub struct AsyncTransport {
    socket_path: String,
}

/// Line-delimited connection, used on both sides of the socket
pub struct AsyncConnection {
    pub reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    pub writer: tokio::net::unix::OwnedWriteHalf,
    // partial line kept across cancelled reads
    line: String,
}

impl AsyncTransport {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    /// Connect to the socket and return a stateful connection
    pub async fn connect(&self) -> Result<AsyncConnection, ChannelError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => ChannelError::Connection(
                    "Mailbox is not running. Use 'chirp-auth mailbox' to start it.".to_string(),
                ),
                std::io::ErrorKind::NotFound => ChannelError::Connection(format!(
                    "Mailbox socket not found at {}. Use 'chirp-auth mailbox' to start it.",
                    self.socket_path
                )),
                _ => ChannelError::Connection(format!(
                    "Failed to connect to mailbox at {}: {}",
                    self.socket_path, e
                )),
            })?;

        Ok(AsyncConnection::new(stream))
    }

    /// Send a message and wait for the reply (one-shot request-response)
    pub async fn send_request(&self, message: &ClientMessage) -> Result<ServerMessage, ChannelError> {
        let mut conn = self.connect().await?;
        conn.write_message(message).await?;

        tokio::time::timeout(REQUEST_TIMEOUT, conn.read_server_message())
            .await
            .map_err(|_| {
                ChannelError::Connection(format!(
                    "Request timed out after {}s",
                    REQUEST_TIMEOUT.as_secs()
                ))
            })??
            .ok_or_else(|| ChannelError::Connection("No response from mailbox".to_string()))
    }
}

impl AsyncConnection {
    pub fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        }
    }

    /// Read one full line; safe to cancel inside `select!`
    async fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        let n = self.reader.read_line(&mut self.line).await?;
        if n == 0 && self.line.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.line)))
    }

    /// Read a client message (server side); `None` on EOF
    pub async fn read_client_message(&mut self) -> Result<Option<ClientMessage>, ChannelError> {
        match self.read_line().await? {
            None => Ok(None),
            Some(line) => Ok(Some(codec::decode_client_message(&line)?)),
        }
    }

    /// Read a server message (client side); `None` on EOF
    pub async fn read_server_message(&mut self) -> Result<Option<ServerMessage>, ChannelError> {
        match self.read_line().await? {
            None => Ok(None),
            Some(line) => Ok(Some(codec::decode_server_message(&line)?)),
        }
    }

    pub async fn write_message(&mut self, message: &ClientMessage) -> Result<(), ChannelError> {
        let encoded = codec::encode_client_message(message)?;
        self.write_raw(encoded.as_bytes()).await
    }

    pub async fn write_server_message(&mut self, message: &ServerMessage) -> Result<(), ChannelError> {
        let encoded = codec::encode_server_message(message)?;
        self.write_raw(encoded.as_bytes()).await
    }

    /// Write pre-encoded bytes (broadcast events are encoded once for all subscribers)
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
