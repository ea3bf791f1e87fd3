//! Connection handler
//!
//! Handles individual client connections: username claim, line parsing,
//! and bidirectional communication with the ChatServer.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{AdmissionError, AppError};
use crate::message::{ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::session::{Session, SessionHandle};
use crate::types::SessionId;

/// Outbound queue depth per session
const SESSION_CHANNEL_SIZE: usize = 64;

/// How long a rejected peer may keep sending before the socket is dropped
const REJECT_LINGER: Duration = Duration::from_secs(2);

type LineReader = Lines<BufReader<OwnedReadHalf>>;

/// Handle a new TCP connection
///
/// Reads the username, asks the ChatServer to admit it, then relays lines
/// until the peer leaves, goes quiet for `read_timeout`, or is kicked. A
/// line that cannot be written within `write_timeout` ends the session.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // First line is the username
    let username = match read_line(&mut lines, read_timeout).await? {
        Some(line) => line.trim().to_string(),
        None => {
            debug!("{} closed before sending a username", peer_addr);
            return Ok(());
        }
    };

    // Create channel for server -> client messages
    let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(SESSION_CHANNEL_SIZE);
    let handle = SessionHandle::new(username, msg_tx);
    let mut session = handle.attach();

    // Register with ChatServer
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(ServerCommand::Join {
            session: handle,
            reply: reply_tx,
        })
        .await
        .map_err(|_| AppError::ChannelSend)?;

    match reply_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => {
            info!("Refusing {}: {}", peer_addr, reason);
            reject(lines.into_inner(), write_half, reason).await;
            return Ok(());
        }
        Err(_) => return Err(AppError::ChannelSend),
    }

    info!(
        "Session {} ('{}') started from {}",
        session.id, session.username, peer_addr
    );

    // Spawn write task (ServerMessage -> socket)
    let write_task = tokio::spawn(write_loop(
        write_half,
        msg_rx,
        session.id,
        write_timeout,
        session.kick_signal(),
    ));

    let result = read_loop(&mut session, &mut lines, &cmd_tx, read_timeout).await;

    if session.disconnect() {
        let _ = cmd_tx
            .send(ServerCommand::Leave {
                session_id: session.id,
            })
            .await;
    }

    // Ends once the registry drops the session's sender or a write stalls
    let _ = write_task.await;

    info!(
        "Session {} ('{}') disconnected, idle for {:?}",
        session.id,
        session.username,
        session.idle_time()
    );

    result
}

/// Relay inbound lines to the ChatServer until the connection ends
async fn read_loop(
    session: &mut Session,
    lines: &mut LineReader,
    cmd_tx: &mpsc::Sender<ServerCommand>,
    read_timeout: Duration,
) -> Result<(), AppError> {
    while session.is_alive() {
        let line = tokio::select! {
            _ = session.kicked() => {
                debug!("Session {} kicked", session.id);
                return Ok(());
            }
            line = read_line(lines, read_timeout) => line,
        };

        let Some(line) = line? else {
            debug!("Session {} closed by peer", session.id);
            return Ok(());
        };

        session.touch();

        let Some(msg) = ClientMessage::parse(&line) else {
            continue;
        };

        if cmd_tx
            .send(client_message_to_command(session.id, msg))
            .await
            .is_err()
        {
            debug!("Server closed, ending read loop for {}", session.id);
            return Err(AppError::ChannelSend);
        }
    }

    Ok(())
}

/// Drain the session's outbound queue onto the socket
///
/// A failed or stalled write kicks the session so its read loop ends too.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut msg_rx: mpsc::Receiver<ServerMessage>,
    session_id: SessionId,
    write_timeout: Duration,
    kick: Arc<Notify>,
) {
    while let Some(msg) = msg_rx.recv().await {
        match timeout(write_timeout, write_line(&mut writer, &msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to session {} failed: {}", session_id, e);
                kick.notify_one();
                break;
            }
            Err(_) => {
                warn!(
                    "Write to session {} stalled for {:?}, dropping connection",
                    session_id, write_timeout
                );
                kick.notify_one();
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
    debug!("Write task ended for {}", session_id);
}

/// Send a single `ERROR:` line and close
///
/// Unread input is drained until the peer hangs up (or `REJECT_LINGER`
/// passes) so the close does not reset the connection under the error line.
pub(crate) async fn reject<R, W>(mut reader: R, mut writer: W, reason: AdmissionError)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(e) = write_line(&mut writer, &ServerMessage::Error(reason.to_string())).await {
        debug!("Could not deliver rejection: {}", e);
        return;
    }
    let _ = writer.shutdown().await;

    let mut buf = [0u8; 512];
    let _ = timeout(REJECT_LINGER, async {
        while let Ok(n) = reader.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

/// Read one line, bounded by `read_timeout`
async fn read_line(lines: &mut LineReader, read_timeout: Duration) -> Result<Option<String>, AppError> {
    match timeout(read_timeout, lines.next_line()).await {
        Ok(line) => Ok(line?),
        Err(_) => {
            warn!("No data for {:?}, dropping connection", read_timeout);
            Err(AppError::Timeout(read_timeout))
        }
    }
}

/// Write a single protocol line
pub(crate) async fn write_line<W>(writer: &mut W, msg: &ServerMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = msg.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Convert a ClientMessage to a ServerCommand
fn client_message_to_command(session_id: SessionId, msg: ClientMessage) -> ServerCommand {
    match msg {
        ClientMessage::Chat(content) => ServerCommand::Chat {
            session_id,
            content,
        },
        ClientMessage::Command(command) => ServerCommand::Command {
            session_id,
            command,
        },
    }
}
