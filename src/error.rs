//! Error types for the chat relay
//!
//! Defines server-side connection errors, admission rejections,
//! session send errors and client-side errors.
//! Uses thiserror for ergonomic error definitions.

use std::time::Duration;

use thiserror::Error;

/// Server-side connection errors
///
/// All of these end a single connection; none of them is fatal to the
/// listener or to other sessions.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on the peer socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No line arrived within the read timeout
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    /// Channel send error (fatal - the server actor is gone)
    #[error("Channel send error")]
    ChannelSend,
}

/// Reasons a connection is refused a session
///
/// The display text is sent verbatim to the rejected peer as an
/// `ERROR:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// First line was blank
    #[error("Username cannot be empty")]
    EmptyUsername,

    /// Live session count reached capacity
    #[error("Server is full. Try again later.")]
    ServerFull,

    /// Another live session holds the name
    #[error("Username already taken")]
    UsernameTaken,

    /// Shutdown has started; no new sessions
    #[error("Server is shutting down")]
    ShuttingDown,
}

/// Message send errors
///
/// Occurs when delivering a line to a session's outbound channel.
#[derive(Debug, Error)]
pub enum SendError {
    /// The session's writer has gone away
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer is not draining its outbound queue
    #[error("Outbound queue full")]
    Backlogged,
}

/// Client connection errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("already connected")]
    AlreadyConnected,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}
