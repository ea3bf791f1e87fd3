//! Server listener loop
//!
//! Accepts connections, turns away peers while the server is full, and
//! spawns a handler task per admitted connection. A [`ServerHandle`]
//! stops the loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::{AdmissionError, AppError};
use crate::handler::{handle_connection, reject};
use crate::server::{ChatServer, ServerCommand};

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Bound TCP listener plus the ChatServer actor behind it
pub struct Listener {
    listener: TcpListener,
    cmd_tx: mpsc::Sender<ServerCommand>,
    max_clients: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    handle: ServerHandle,
}

/// Cloneable control handle for a running server
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
    cmd_tx: mpsc::Sender<ServerCommand>,
}

impl Listener {
    /// Bind the configured address and start the ChatServer actor
    pub async fn bind(config: &ServerConfig) -> Result<Self, AppError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        tokio::spawn(ChatServer::new(cmd_rx, config.max_clients).run());

        let handle = ServerHandle {
            running: Arc::new(AtomicBool::new(true)),
            stop: Arc::new(Notify::new()),
            cmd_tx: cmd_tx.clone(),
        };

        Ok(Self {
            listener,
            cmd_tx,
            max_clients: config.max_clients,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            handle,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Accept connections until [`ServerHandle::shutdown`] is called
    ///
    /// The listening socket is released when this returns.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Chat server listening on {}", addr);
        }
        info!("Maximum clients: {}", self.max_clients);

        loop {
            tokio::select! {
                _ = self.handle.stop.notified() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr).await,
                    Err(e) => {
                        if self.handle.is_running() {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                },
            }
        }

        info!("Chat server stopped");
    }

    async fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if !self.handle.is_running() {
            let (reader, writer) = stream.into_split();
            tokio::spawn(reject(reader, writer, AdmissionError::ShuttingDown));
            return;
        }

        let live = session_count(&self.cmd_tx).await.unwrap_or(0);
        if live >= self.max_clients {
            info!("Turning away {}: server full", addr);
            let (reader, writer) = stream.into_split();
            tokio::spawn(reject(reader, writer, AdmissionError::ServerFull));
            return;
        }

        info!("New connection from {} ({} live sessions)", addr, live);
        let cmd_tx = self.cmd_tx.clone();
        let read_timeout = self.read_timeout;
        let write_timeout = self.write_timeout;

        // Spawn handler task for each connection
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, cmd_tx, read_timeout, write_timeout).await {
                error!("Connection handler error for {}: {}", addr, e);
            }
        });
    }
}

impl ServerHandle {
    /// Stop accepting, notify and disconnect every session
    ///
    /// Only the first call has any effect.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping chat server...");

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ServerCommand::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }

        self.stop.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of live sessions
    pub async fn client_count(&self) -> usize {
        session_count(&self.cmd_tx).await.unwrap_or(0)
    }
}

async fn session_count(cmd_tx: &mpsc::Sender<ServerCommand>) -> Option<usize> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(ServerCommand::SessionCount { reply: reply_tx })
        .await
        .ok()?;
    reply_rx.await.ok()
}
