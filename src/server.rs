//! Mailbox service for the shared session record
//!
//! Holds a single [`SessionRecord`], merges updates into it and broadcasts a
//! snapshot of the merged record to every subscriber after each write.

mod handler;

use crate::protocol::{RecordUpdate, ServerMessage, SessionRecord};
use crate::transport::{ChannelError, encode_server_message};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::{Mutex, Notify, mpsc};
use uuid::Uuid;

use handler::handle_connection;

type ServerResult<T> = std::result::Result<T, ChannelError>;

pub struct MailboxServer {
    inner: Arc<ServerInner>,
    listener: UnixListener,
}

impl MailboxServer {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> ServerResult<Self> {
        let socket_path = socket_path.as_ref();

        if let Some(parent) = socket_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        // Remove a stale socket left behind by a previous run
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                ChannelError::Connection(format!(
                    "Mailbox already running at socket: {}",
                    socket_path.display()
                ))
            } else {
                ChannelError::Connection(format!("Failed to bind socket: {}", e))
            }
        })?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = std::fs::metadata(socket_path)
                .map_err(|e| {
                    ChannelError::Connection(format!("Failed to read socket metadata: {}", e))
                })?
                .permissions();
            permissions.set_mode(0o600);
            std::fs::set_permissions(socket_path, permissions).map_err(|e| {
                ChannelError::Connection(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        Ok(Self {
            inner: Arc::new(ServerInner::new()),
            listener,
        })
    }

    /// Notifier that stops [`run`](Self::run) and removes the socket file
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.shutdown_notify)
    }

    pub async fn run(&mut self) -> ServerResult<()> {
        tracing::info!("mailbox listening for connections");

        let shutdown = self.shutdown_handle();

        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!("shutdown requested, stopping mailbox");
                self.cleanup();
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping mailbox");
                self.cleanup();
                Ok(())
            }
            result = self.accept_loop() => result,
        }
    }

    async fn accept_loop(&mut self) -> ServerResult<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, inner).await {
                            tracing::warn!(error = %e, "error handling connection");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    fn cleanup(&self) {
        let addr = self.listener.local_addr().ok();

        if let Some(path) = addr
            .as_ref()
            .and_then(|a| a.as_pathname())
            .filter(|p| p.exists())
            && let Err(e) = std::fs::remove_file(path)
        {
            tracing::warn!(error = %e, "failed to remove socket file");
        }
    }
}

struct SubscriberHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Shared state of the mailbox. Lock order: `record`, then `subscribers`.
struct ServerInner {
    record: Mutex<SessionRecord>,
    subscribers: Mutex<Vec<SubscriberHandle>>,
    shutdown_notify: Arc<Notify>,
}

impl ServerInner {
    fn new() -> Self {
        Self {
            record: Mutex::new(SessionRecord::default()),
            subscribers: Mutex::new(Vec::new()),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    async fn record(&self) -> SessionRecord {
        self.record.lock().await.clone()
    }

    /// Register a subscriber and queue the current record as its first event
    async fn add_subscriber(&self, id: Uuid, tx: mpsc::UnboundedSender<Vec<u8>>) {
        let record = self.record.lock().await;
        if let Some(bytes) = snapshot_bytes(&record) {
            let _ = tx.send(bytes);
        }
        self.subscribers.lock().await.push(SubscriberHandle { id, tx });
    }

    async fn remove_subscriber(&self, id: Uuid) {
        self.subscribers.lock().await.retain(|s| s.id != id);
    }

    /// Merge an update and broadcast the result, even if nothing changed
    async fn apply(&self, update: &RecordUpdate) -> SessionRecord {
        let mut record = self.record.lock().await;
        record.apply(update);
        tracing::info!(
            flag = record.flag,
            slope = record.slope,
            calculated_slope = ?record.calculated_slope,
            r2 = ?record.r2,
            "record updated"
        );

        if let Some(bytes) = snapshot_bytes(&record) {
            let mut subs = self.subscribers.lock().await;
            // Drop subscribers whose connection has gone away
            subs.retain(|sub| sub.tx.send(bytes.clone()).is_ok());
        }
        record.clone()
    }
}

fn snapshot_bytes(record: &SessionRecord) -> Option<Vec<u8>> {
    let ts = jiff::Timestamp::now().as_millisecond().max(0) as u64;
    match encode_server_message(&ServerMessage::new_snapshot(record.clone(), ts)) {
        Ok(line) => Some(line.into_bytes()),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode snapshot");
            None
        }
    }
}
