//! Session state
//!
//! A session is split in two halves that share the liveness flag and the
//! kick signal:
//! - [`SessionHandle`] lives in the registry and delivers lines to the peer.
//! - [`Session`] is owned by the connection task and tracks activity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::SessionId;

/// Registry-side view of a live session
///
/// Holds the claimed username and the outbound channel to the
/// session's writer task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    username: String,
    sender: mpsc::Sender<ServerMessage>,
    alive: Arc<AtomicBool>,
    kick: Arc<Notify>,
}

impl SessionHandle {
    /// Create a handle for a fresh connection with the given outbound channel
    pub fn new(username: impl Into<String>, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: SessionId::new(),
            username: username.into(),
            sender,
            alive: Arc::new(AtomicBool::new(true)),
            kick: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// True until the owning connection has disconnected
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    /// Queue a message for this session
    ///
    /// Never waits: a peer whose queue is full is kicked instead.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => {
                self.kick();
                SendError::Backlogged
            }
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Ask the connection task to disconnect
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Connection-side state sharing this handle's liveness and kick signal
    pub fn attach(&self) -> Session {
        Session {
            id: self.id,
            username: self.username.clone(),
            last_activity: Instant::now(),
            alive: Arc::clone(&self.alive),
            kick: Arc::clone(&self.kick),
        }
    }
}

/// Connection-side session state
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub username: String,
    last_activity: Instant,
    alive: Arc<AtomicBool>,
    kick: Arc<Notify>,
}

impl Session {
    /// Record an inbound line
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last inbound line
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Flip the session to not-alive
    ///
    /// Returns true only for the call that performed the transition.
    pub fn disconnect(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Resolves once the session has been kicked
    pub async fn kicked(&self) {
        self.kick.notified().await;
    }

    /// Signal that ends this session's read loop from another task
    pub fn kick_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.kick)
    }
}
