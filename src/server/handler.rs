//! Connection and message handling
//!
//! One task per client connection. Requests are answered in order; if the
//! client subscribed, broadcast snapshots are interleaved with the replies.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{AsyncConnection, ChannelError};
use std::sync::Arc;
use tokio::net::UnixStream;
use uuid::Uuid;

use super::ServerInner;

type ServerResult<T> = std::result::Result<T, ChannelError>;

pub(super) async fn handle_connection(
    stream: UnixStream,
    inner: Arc<ServerInner>,
) -> ServerResult<()> {
    let mut conn = AsyncConnection::new(stream);

    let mut subscriber_id: Option<Uuid> = None;
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();

    let result = loop {
        tokio::select! {
            request = conn.read_client_message() => {
                let request = match request {
                    Ok(Some(request)) => request,
                    Ok(None) => break Ok(()),
                    Err(ChannelError::Serialization(e)) => {
                        tracing::warn!(error = %e, "malformed request");
                        let reply = ServerMessage::Error {
                            id: Uuid::nil(),
                            error: format!("malformed request: {}", e),
                        };
                        if let Err(e) = conn.write_server_message(&reply).await {
                            break Err(e);
                        }
                        continue;
                    }
                    Err(e) => break Err(e),
                };

                tracing::debug!(?request, "received request");

                let reply = match request {
                    ClientMessage::Subscribe { id } => {
                        if subscriber_id.is_none() {
                            inner.add_subscriber(id, event_tx.clone()).await;
                            subscriber_id = Some(id);
                        }
                        ServerMessage::Subscribed { id }
                    }
                    ClientMessage::Get { id } => ServerMessage::Record {
                        id,
                        record: inner.record().await,
                    },
                    ClientMessage::Update { id, update } => {
                        inner.apply(&update).await;
                        ServerMessage::Updated { id }
                    }
                };

                if let Err(e) = conn.write_server_message(&reply).await {
                    break Err(e);
                }
            }

            Some(event) = event_rx.recv() => {
                if let Err(e) = conn.write_raw(&event).await {
                    break Err(e);
                }
            }
        }
    };

    if let Some(id) = subscriber_id {
        inner.remove_subscriber(id).await;
    }

    result
}
