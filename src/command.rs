//! Command dispatcher
//!
//! Parses `/`-prefixed client lines and turns them into a reply for the
//! sender, possibly delivering a whisper along the way.

use chrono::Local;

use crate::message::ServerMessage;
use crate::registry::Registry;

const WHISPER_USAGE: &str = "Usage: /whisper <username> <message>";
const UNKNOWN_COMMAND: &str =
    "Unknown command. Available: /ping, /users, /time, /whisper <user> <message>";

/// Client commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Users,
    Time,
    Whisper { target: String, message: String },
    /// `/whisper` without both a target and a message
    MalformedWhisper,
    Unknown(String),
}

impl Command {
    /// Parse a trimmed `/`-prefixed line
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (name, args) = line
            .split_once(char::is_whitespace)
            .map(|(name, args)| (name, args.trim_start()))
            .unwrap_or((line, ""));

        match (name, args) {
            ("/ping", "") => Command::Ping,
            ("/users", "") => Command::Users,
            ("/time", "") => Command::Time,
            ("/whisper", args) => match args.split_once(char::is_whitespace) {
                Some((target, message)) if !message.trim().is_empty() => Command::Whisper {
                    target: target.to_string(),
                    message: message.trim_start().to_string(),
                },
                _ => Command::MalformedWhisper,
            },
            _ => Command::Unknown(line.to_string()),
        }
    }

    /// Run the command on behalf of `sender`, returning the reply
    pub fn execute(self, registry: &Registry, sender: &str) -> ServerMessage {
        match self {
            Command::Ping => ServerMessage::system("Pong! Server is alive."),
            Command::Users => ServerMessage::System(format!(
                "Online users: {}",
                registry.snapshot_usernames().join(", ")
            )),
            Command::Time => ServerMessage::System(format!(
                "Server time: {}",
                Local::now().format("%a %b %d %H:%M:%S %Y")
            )),
            Command::Whisper { target, message } => {
                let whisper = ServerMessage::Private {
                    from: sender.to_string(),
                    content: message,
                };
                if registry.send_to(&target, whisper) {
                    ServerMessage::System(format!("Whisper sent to {}", target))
                } else {
                    ServerMessage::System(format!("User {} not found", target))
                }
            }
            Command::MalformedWhisper => ServerMessage::system(WHISPER_USAGE),
            Command::Unknown(_) => ServerMessage::system(UNKNOWN_COMMAND),
        }
    }
}
