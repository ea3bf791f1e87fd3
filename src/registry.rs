//! Session registry
//!
//! The authoritative set of live sessions and claimed usernames.
//! Owned by the `ChatServer` actor, which serializes every call.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::AdmissionError;
use crate::message::ServerMessage;
use crate::session::SessionHandle;
use crate::types::SessionId;

/// Live sessions keyed by id, plus claimed usernames in join order
///
/// `usernames` always equals the usernames of the entries in `sessions`.
#[derive(Debug)]
pub struct Registry {
    sessions: HashMap<SessionId, SessionHandle>,
    usernames: Vec<String>,
    capacity: usize,
}

impl Registry {
    /// Create an empty registry admitting at most `capacity` sessions
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            usernames: Vec::new(),
            capacity,
        }
    }

    /// Check capacity and username uniqueness, then insert
    pub fn try_admit(&mut self, session: SessionHandle) -> Result<(), AdmissionError> {
        if session.username().is_empty() {
            return Err(AdmissionError::EmptyUsername);
        }
        if self.sessions.len() >= self.capacity {
            return Err(AdmissionError::ServerFull);
        }
        if self.is_claimed(session.username()) {
            return Err(AdmissionError::UsernameTaken);
        }

        self.usernames.push(session.username().to_string());
        self.sessions.insert(session.id(), session);
        Ok(())
    }

    /// Remove a session and release its username
    ///
    /// Returns `None` if the session was already removed.
    pub fn remove(&mut self, session_id: SessionId) -> Option<SessionHandle> {
        let session = self.sessions.remove(&session_id)?;
        self.usernames.retain(|name| name != session.username());
        Some(session)
    }

    /// Remove every session, returning them
    pub fn drain(&mut self) -> Vec<SessionHandle> {
        self.usernames.clear();
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn get(&self, session_id: SessionId) -> Option<&SessionHandle> {
        self.sessions.get(&session_id)
    }

    /// Deliver to every live session except `exclude`
    ///
    /// A failed delivery only affects that recipient. Returns the number
    /// of sessions the line was queued for.
    pub fn broadcast(&self, msg: &ServerMessage, exclude: Option<SessionId>) -> usize {
        debug!("Broadcasting: {}", msg);

        self.sessions
            .values()
            .filter(|session| Some(session.id()) != exclude && session.is_alive())
            .filter(|session| match session.send(msg.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Broadcast to {} failed: {}", session.username(), e);
                    false
                }
            })
            .count()
    }

    /// Broadcast the current `USERS:` list to every session
    pub fn broadcast_user_list(&self) -> usize {
        self.broadcast(&ServerMessage::Users(self.snapshot_usernames()), None)
    }

    /// Deliver to the live session claiming `username`
    pub fn send_to(&self, username: &str, msg: ServerMessage) -> bool {
        self.sessions
            .values()
            .find(|session| session.username() == username && session.is_alive())
            .is_some_and(|session| session.send(msg).is_ok())
    }

    /// Deliver to a session by id
    pub fn send(&self, session_id: SessionId, msg: ServerMessage) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|session| session.send(msg).is_ok())
    }

    /// Point-in-time copy of claimed usernames, in join order
    pub fn snapshot_usernames(&self) -> Vec<String> {
        self.usernames.clone()
    }

    pub fn is_claimed(&self, username: &str) -> bool {
        self.usernames.iter().any(|name| name == username)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
