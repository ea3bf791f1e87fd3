//! Client-side protocol decoder
//!
//! Classifies lines received from the server into listener events.

use crate::message::{ERROR_PREFIX, PRIVATE_PREFIX, USERS_PREFIX};

/// A classified server line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `ERROR:` payload
    Error(String),
    /// `USERS:` payload split on commas
    Users(Vec<String>),
    /// `PRIVATE:` payload
    Private(String),
    /// Any other line, unmodified (including `SYSTEM:` lines)
    Message(String),
}

impl InboundMessage {
    /// Classify one line
    ///
    /// An empty `USERS:` list yields `None`.
    pub fn decode(line: &str) -> Option<Self> {
        if let Some(reason) = line.strip_prefix(ERROR_PREFIX) {
            Some(InboundMessage::Error(reason.to_string()))
        } else if let Some(users) = line.strip_prefix(USERS_PREFIX) {
            if users.is_empty() {
                return None;
            }
            Some(InboundMessage::Users(
                users.split(',').map(str::to_string).collect(),
            ))
        } else if let Some(text) = line.strip_prefix(PRIVATE_PREFIX) {
            Some(InboundMessage::Private(text.to_string()))
        } else {
            Some(InboundMessage::Message(line.to_string()))
        }
    }
}
