//! Line-based TCP Chat Relay Library
//!
//! A minimal real-time chat service: a server that tracks connected users
//! and relays lines among them, and a client that connects to it and reports
//! what happens through a listener.
//!
//! # Features
//! - Username claim as the first line, unique among live sessions
//! - Capacity limit with `ERROR:` rejection
//! - Broadcast chat, join/leave notices and `USERS:` lists
//! - Commands: `/ping`, `/users`, `/time`, `/whisper <user> <message>`
//! - Per-connection read timeout
//! - Client keepalive, read timeout and reachability probe
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` owns the session registry and processes one command at a time
//! - Each connection has a `handler` task plus a writer task
//! - No locks needed on the server - all registry access goes through message passing
//!
//! # Example
//! ```ignore
//! use chat_relay::{ChatClient, ClientEvent, Listener, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = Listener::bind(&ServerConfig::default()).await.unwrap();
//!     let server = listener.handle();
//!     tokio::spawn(listener.run());
//!
//!     let client = ChatClient::new("alice");
//!     let (tx, mut events) = tokio::sync::mpsc::unbounded_channel::<ClientEvent>();
//!     client.set_message_listener(tx);
//!     client.connect("127.0.0.1", 12345).await;
//!     client.send_message("hi");
//!
//!     server.shutdown().await;
//! }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{test_connection, ChatClient, ClientEvent, MessageListener};
pub use command::Command;
pub use config::{ClientConfig, ServerConfig, DEFAULT_MAX_CLIENTS, DEFAULT_PORT, DEFAULT_PROBE_TIMEOUT};
pub use decoder::InboundMessage;
pub use error::{AdmissionError, AppError, ClientError, ConfigError, SendError};
pub use handler::handle_connection;
pub use listener::{Listener, ServerHandle};
pub use message::{ClientMessage, ServerMessage};
pub use registry::Registry;
pub use server::{ChatServer, ServerCommand};
pub use session::{Session, SessionHandle};
pub use types::SessionId;
