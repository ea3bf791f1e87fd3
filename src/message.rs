//! Message protocol definitions
//!
//! Newline-delimited UTF-8 text, one message per line. Server lines carry
//! a type prefix (`ERROR:`, `USERS:`, `PRIVATE:`, `SYSTEM:`) or are plain
//! `<username>:<text>` chat. Client lines are either chat text or a
//! `/`-prefixed command.

use std::fmt;

use crate::command::Command;

pub const ERROR_PREFIX: &str = "ERROR:";
pub const USERS_PREFIX: &str = "USERS:";
pub const PRIVATE_PREFIX: &str = "PRIVATE:";
pub const SYSTEM_PREFIX: &str = "SYSTEM:";

/// Marks a client line as a command
pub const COMMAND_MARKER: char = '/';

/// Server → Client message
///
/// `Display` renders the exact wire line, without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Terminal error for the receiving connection
    Error(String),
    /// Full list of claimed usernames
    Users(Vec<String>),
    /// Whisper routed to a single recipient
    Private { from: String, content: String },
    /// Server notice
    System(String),
    /// Chat line relayed from another user
    Chat { from: String, content: String },
}

impl ServerMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ServerMessage::System(text.into())
    }

    pub fn joined(username: &str) -> Self {
        ServerMessage::System(format!("{} joined the chat", username))
    }

    pub fn left(username: &str) -> Self {
        ServerMessage::System(format!("{} left the chat", username))
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Error(reason) => write!(f, "{}{}", ERROR_PREFIX, reason),
            ServerMessage::Users(users) => write!(f, "{}{}", USERS_PREFIX, users.join(",")),
            ServerMessage::Private { from, content } => {
                write!(f, "{}{} (whisper): {}", PRIVATE_PREFIX, from, content)
            }
            ServerMessage::System(text) => write!(f, "{}{}", SYSTEM_PREFIX, text),
            ServerMessage::Chat { from, content } => write!(f, "{}:{}", from, content),
        }
    }
}

/// Client → Server message (any line after the username)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Plain text to broadcast
    Chat(String),
    /// `/`-prefixed command
    Command(Command),
}

impl ClientMessage {
    /// Classify a raw inbound line
    ///
    /// Surrounding whitespace is trimmed; blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.starts_with(COMMAND_MARKER) {
            Some(ClientMessage::Command(Command::parse(line)))
        } else {
            Some(ClientMessage::Chat(line.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_lines() {
        assert_eq!(
            ServerMessage::Error("Username already taken".into()).to_string(),
            "ERROR:Username already taken"
        );
        assert_eq!(
            ServerMessage::Users(vec!["alice".into(), "bob".into()]).to_string(),
            "USERS:alice,bob"
        );
        assert_eq!(
            ServerMessage::Private {
                from: "alice".into(),
                content: "hello".into()
            }
            .to_string(),
            "PRIVATE:alice (whisper): hello"
        );
        assert_eq!(
            ServerMessage::Chat {
                from: "alice".into(),
                content: "hi".into()
            }
            .to_string(),
            "alice:hi"
        );
    }

    #[test]
    fn test_join_leave_notices() {
        assert_eq!(
            ServerMessage::joined("bob").to_string(),
            "SYSTEM:bob joined the chat"
        );
        assert_eq!(
            ServerMessage::left("bob").to_string(),
            "SYSTEM:bob left the chat"
        );
    }

    #[test]
    fn test_empty_user_list() {
        assert_eq!(ServerMessage::Users(Vec::new()).to_string(), "USERS:");
    }

    #[test]
    fn test_client_message_parse() {
        assert_eq!(
            ClientMessage::parse("  hello there \r"),
            Some(ClientMessage::Chat("hello there".into()))
        );
        assert_eq!(
            ClientMessage::parse("/ping"),
            Some(ClientMessage::Command(Command::Ping))
        );
        assert_eq!(ClientMessage::parse("   "), None);
        assert_eq!(ClientMessage::parse(""), None);
    }
}
