//! The device's view of the session record

use crate::protocol::{ClientMessage, FlagCodes, ServerMessage, Snapshot, StateWrite};
use crate::transport::{AsyncTransport, ChannelError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Subscribe to the session record and write state flags back to it.
///
/// Delivery is at-least-once: the same snapshot may arrive more than once.
#[async_trait]
pub trait SessionChannel: Send {
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Snapshot>, ChannelError>;

    async fn write(&mut self, write: StateWrite) -> Result<(), ChannelError>;
}

/// [`SessionChannel`] backed by the mailbox socket
pub struct SocketChannel {
    transport: AsyncTransport,
    codes: FlagCodes,
}

impl SocketChannel {
    pub fn new(transport: AsyncTransport, codes: FlagCodes) -> Self {
        Self { transport, codes }
    }
}

#[async_trait]
impl SessionChannel for SocketChannel {
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Snapshot>, ChannelError> {
        let mut conn = self.transport.connect().await?;
        conn.write_message(&ClientMessage::new_subscribe()).await?;

        match conn.read_server_message().await? {
            Some(ServerMessage::Subscribed { .. }) => {}
            Some(ServerMessage::Error { error, .. }) => return Err(ChannelError::Rejected(error)),
            Some(other) => {
                return Err(ChannelError::Rejected(format!(
                    "unexpected reply to subscribe: {other:?}"
                )));
            }
            None => {
                return Err(ChannelError::Connection(
                    "mailbox closed the connection".to_string(),
                ));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let codes = self.codes;
        tokio::spawn(async move {
            loop {
                match conn.read_server_message().await {
                    Ok(Some(ServerMessage::Snapshot { record, .. })) => {
                        let Some(snapshot) = codes.decode(&record) else {
                            tracing::warn!(flag = record.flag, "ignoring unknown flag code");
                            continue;
                        };
                        if tx.send(snapshot).is_err() {
                            break;
                        }
                    }
                    Ok(Some(other)) => {
                        tracing::debug!(message = ?other, "ignoring message on subscription");
                    }
                    Ok(None) => {
                        tracing::info!("mailbox closed the subscription");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "subscription failed");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn write(&mut self, write: StateWrite) -> Result<(), ChannelError> {
        let update = self.codes.encode(&write);
        match self
            .transport
            .send_request(&ClientMessage::new_update(update))
            .await?
        {
            ServerMessage::Updated { .. } => Ok(()),
            ServerMessage::Error { error, .. } => Err(ChannelError::Rejected(error)),
            other => Err(ChannelError::Rejected(format!(
                "unexpected reply to update: {other:?}"
            ))),
        }
    }
}
