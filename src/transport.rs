//! Transport layer for the mailbox socket
//!
//! - `codec`: NDJSON encoding/decoding for messages
//! - `async_transport`: Tokio-based client transport and server-side connection

use thiserror::Error;

mod async_transport;
mod codec;

pub use async_transport::{AsyncConnection, AsyncTransport};
pub use codec::encode_server_message;

/// Default Unix socket path for the mailbox service
pub const DEFAULT_SOCKET_PATH: &str = "/run/user/$UID/chirp-auth/mailbox.sock";

/// Failure reading or writing the session record
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Mailbox connection error: {0}")]
    Connection(String),
    #[error("Mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Mailbox rejected request: {0}")]
    Rejected(String),
}
