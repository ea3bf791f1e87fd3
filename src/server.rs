//! ChatServer Actor implementation
//!
//! The central actor that owns the session registry.
//! Every registry operation arrives as a `ServerCommand` and is processed one
//! at a time, so admission (capacity + uniqueness + insertion) is atomic and
//! broadcasts never race with removals.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::AdmissionError;
use crate::message::ServerMessage;
use crate::registry::Registry;
use crate::session::SessionHandle;
use crate::types::SessionId;

/// Commands sent from connection handlers and the listener to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// Claim a username for a new connection
    Join {
        session: SessionHandle,
        reply: oneshot::Sender<Result<(), AdmissionError>>,
    },
    /// Admitted session disconnected
    Leave {
        session_id: SessionId,
    },
    /// Broadcast a chat line
    Chat {
        session_id: SessionId,
        content: String,
    },
    /// Execute a `/` command
    Command {
        session_id: SessionId,
        command: Command,
    },
    /// Query the live session count
    SessionCount {
        reply: oneshot::Sender<usize>,
    },
    /// Notify everyone, then kick and drop every session
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The main ChatServer actor
pub struct ChatServer {
    registry: Registry,
    /// Set by the first shutdown; refuses every later join
    shutting_down: bool,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer admitting at most `capacity` sessions
    pub fn new(receiver: mpsc::Receiver<ServerCommand>, capacity: usize) -> Self {
        Self {
            registry: Registry::new(capacity),
            shutting_down: false,
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!(
            "ChatServer started (capacity {})",
            self.registry.capacity()
        );

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Join { session, reply } => {
                self.handle_join(session, reply);
            }
            ServerCommand::Leave { session_id } => {
                self.handle_leave(session_id);
            }
            ServerCommand::Chat {
                session_id,
                content,
            } => {
                self.handle_chat(session_id, content);
            }
            ServerCommand::Command {
                session_id,
                command,
            } => {
                self.handle_client_command(session_id, command);
            }
            ServerCommand::SessionCount { reply } => {
                let _ = reply.send(self.registry.len());
            }
            ServerCommand::Shutdown { reply } => {
                self.handle_shutdown();
                let _ = reply.send(());
            }
        }
    }

    /// Handle username claim
    fn handle_join(
        &mut self,
        session: SessionHandle,
        reply: oneshot::Sender<Result<(), AdmissionError>>,
    ) {
        let session_id = session.id();
        let username = session.username().to_string();

        if self.shutting_down {
            info!("Rejected '{}': server is shutting down", username);
            let _ = reply.send(Err(AdmissionError::ShuttingDown));
            return;
        }

        if let Err(reason) = self.registry.try_admit(session) {
            info!("Rejected '{}': {}", username, reason);
            let _ = reply.send(Err(reason));
            return;
        }

        if reply.send(Ok(())).is_err() {
            // Handler vanished between the claim and the answer
            self.registry.remove(session_id);
            return;
        }

        info!("{} joined the chat", username);
        self.registry
            .broadcast(&ServerMessage::joined(&username), Some(session_id));
        self.registry.broadcast_user_list();

        debug!("Total sessions: {}", self.registry.len());
    }

    /// Handle session disconnection
    fn handle_leave(&mut self, session_id: SessionId) {
        let Some(session) = self.registry.remove(session_id) else {
            return;
        };

        info!("{} left the chat", session.username());
        self.registry
            .broadcast(&ServerMessage::left(session.username()), Some(session_id));
        self.registry.broadcast_user_list();

        debug!("Total sessions: {}", self.registry.len());
    }

    /// Handle chat message
    fn handle_chat(&mut self, session_id: SessionId, content: String) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };

        let msg = ServerMessage::Chat {
            from: session.username().to_string(),
            content,
        };
        self.registry.broadcast(&msg, Some(session_id));
    }

    /// Handle a `/` command and answer the sender
    fn handle_client_command(&mut self, session_id: SessionId, command: Command) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };

        debug!("{} issued {:?}", session.username(), command);
        let reply = command.execute(&self.registry, session.username());
        if !self.registry.send(session_id, reply) {
            warn!("Reply to {} was not delivered", session.username());
        }
    }

    /// Handle administrative shutdown
    fn handle_shutdown(&mut self) {
        self.shutting_down = true;
        info!("Disconnecting {} sessions", self.registry.len());

        self.registry
            .broadcast(&ServerMessage::system("Server is shutting down..."), None);

        for session in self.registry.drain() {
            session.kick();
        }
    }
}
