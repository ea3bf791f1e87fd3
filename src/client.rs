//! Chat client connection manager
//!
//! Owns the socket to the server and three tasks per connection:
//! - a receive loop decoding server lines into listener callbacks
//! - a keepalive loop sending `/ping` on a fixed period
//! - a writer draining queued outbound lines
//!
//! Callers observe the connection only through a [`MessageListener`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::decoder::InboundMessage;
use crate::error::ClientError;

/// Outbound queue depth
const OUTBOUND_BUFFER: usize = 64;

/// Receives connection events
///
/// Callbacks run on the client's tasks, in the order lines arrive.
pub trait MessageListener: Send + Sync {
    fn on_message_received(&self, message: &str);
    fn on_connection_status_changed(&self, connected: bool);
    fn on_error(&self, error: &str);
    fn on_user_list_updated(&self, users: &[String]);
}

/// Listener events as values, for channel-fed consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageReceived(String),
    ConnectionStatusChanged(bool),
    Error(String),
    UserListUpdated(Vec<String>),
}

/// Forward every callback into a channel
impl MessageListener for mpsc::UnboundedSender<ClientEvent> {
    fn on_message_received(&self, message: &str) {
        let _ = self.send(ClientEvent::MessageReceived(message.to_string()));
    }

    fn on_connection_status_changed(&self, connected: bool) {
        let _ = self.send(ClientEvent::ConnectionStatusChanged(connected));
    }

    fn on_error(&self, error: &str) {
        let _ = self.send(ClientEvent::Error(error.to_string()));
    }

    fn on_user_list_updated(&self, users: &[String]) {
        let _ = self.send(ClientEvent::UserListUpdated(users.to_vec()));
    }
}

/// A chat client bound to one username
///
/// States: disconnected → connected → disconnected. There is no automatic
/// reconnect; call [`ChatClient::connect`] again after a disconnect.
pub struct ChatClient {
    username: String,
    config: ClientConfig,
    shared: Arc<Shared>,
}

/// State shared between the client and its tasks
struct Shared {
    username: String,
    connected: AtomicBool,
    /// Bumped on every successful connect
    generation: AtomicU64,
    last_message_time: Mutex<Instant>,
    listener: RwLock<Option<Arc<dyn MessageListener>>>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    server_addr: Mutex<Option<SocketAddr>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatClient {
    /// Create a client with the default configuration
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_config(username, ClientConfig::default())
    }

    pub fn with_config(username: impl Into<String>, config: ClientConfig) -> Self {
        let username = username.into();
        Self {
            shared: Arc::new(Shared {
                username: username.clone(),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                last_message_time: Mutex::new(Instant::now()),
                listener: RwLock::new(None),
                outbound: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                server_addr: Mutex::new(None),
            }),
            username,
            config,
        }
    }

    /// Register the listener, replacing any previous one
    pub fn set_message_listener(&self, listener: impl MessageListener + 'static) {
        *self
            .shared
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    pub fn remove_message_listener(&self) {
        *self
            .shared
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Connect using the configured connect timeout
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        self.connect_with_timeout(host, port, self.config.connect_timeout())
            .await
    }

    /// Open the connection, announce the username and start the loops
    ///
    /// On failure the listener receives a disconnected status and an error
    /// describing the cause.
    pub async fn connect_with_timeout(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> bool {
        match self.open(host, port, connect_timeout).await {
            Ok(()) => {
                info!("Connected to server as {}", self.username);
                true
            }
            Err(ClientError::AlreadyConnected) => {
                warn!("{} is already connected", self.username);
                false
            }
            Err(e) => {
                let msg = format!("Failed to connect to server at {}:{} - {}", host, port, e);
                error!("{}", msg);
                self.shared.connected.store(false, Ordering::SeqCst);
                self.shared.notify_status(false);
                self.shared.report_error(&msg);
                false
            }
        }
    }

    async fn open(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<(), ClientError> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected);
        }

        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ClientError::ConnectTimeout(connect_timeout))??;
        let server_addr = stream.peer_addr().ok();
        let (read_half, mut write_half) = stream.into_split();

        // Username goes first
        write_half
            .write_all(format!("{}\n", self.username).as_bytes())
            .await?;
        write_half.flush().await?;

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        *lock(&self.shared.outbound) = Some(out_tx);
        *lock(&self.shared.server_addr) = server_addr;
        self.shared.touch();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.notify_status(true);

        tokio::spawn(write_loop(
            Arc::clone(&self.shared),
            write_half,
            out_rx,
            generation,
        ));
        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            read_half,
            self.config.read_timeout(),
            generation,
        ));
        let keepalive = tokio::spawn(keepalive_loop(
            Arc::clone(&self.shared),
            self.config.keepalive_interval(),
        ));

        let mut tasks = lock(&self.shared.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(receiver);
        tasks.push(keepalive);

        Ok(())
    }

    /// Queue a chat line
    ///
    /// Rejected when disconnected or when `text` is blank. Socket errors
    /// surface later through the listener.
    pub fn send_message(&self, text: &str) -> bool {
        self.shared.send_line(text)
    }

    /// Send `/whisper <target> <text>`
    pub fn send_private_message(&self, target: &str, text: &str) -> bool {
        self.shared.send_line(&format!("/whisper {} {}", target, text))
    }

    /// Send `/users`
    pub fn request_user_list(&self) -> bool {
        self.shared.send_line("/users")
    }

    /// Close the connection; later calls do nothing
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// True while the connection flag is set and the transport is open
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
            && lock(&self.shared.outbound)
                .as_ref()
                .is_some_and(|tx| !tx.is_closed())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// When the last line arrived from the server
    pub fn last_message_time(&self) -> Instant {
        *lock(&self.shared.last_message_time)
    }

    /// Remote address while connected
    pub fn server_address(&self) -> Option<SocketAddr> {
        *lock(&self.shared.server_addr)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

/// Check that `host:port` accepts TCP connections, then hang up
pub async fn test_connection(host: &str, port: u16, probe_timeout: Duration) -> bool {
    match timeout(probe_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!("Probe of {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => {
            debug!("Probe of {}:{} timed out", host, port);
            false
        }
    }
}

impl Shared {
    fn listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify_status(&self, connected: bool) {
        if let Some(listener) = self.listener() {
            listener.on_connection_status_changed(connected);
        }
    }

    fn report_error(&self, error: &str) {
        if let Some(listener) = self.listener() {
            listener.on_error(error);
        }
    }

    fn touch(&self) {
        *lock(&self.last_message_time) = Instant::now();
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connected.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Map one server line to a callback
    fn handle_line(&self, line: &str) {
        let Some(listener) = self.listener() else {
            return;
        };

        match InboundMessage::decode(line) {
            Some(InboundMessage::Error(reason)) => listener.on_error(&reason),
            Some(InboundMessage::Users(users)) => listener.on_user_list_updated(&users),
            Some(InboundMessage::Private(text)) | Some(InboundMessage::Message(text)) => {
                listener.on_message_received(&text)
            }
            None => {}
        }
    }

    fn send_line(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || !self.connected.load(Ordering::SeqCst) {
            return false;
        }

        let Some(tx) = lock(&self.outbound).clone() else {
            return false;
        };

        match tx.try_send(text.to_string()) {
            Ok(()) => true,
            Err(e) => {
                error!("Error sending message: {}", e);
                self.report_error("Failed to send message");
                false
            }
        }
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        // Closing the queue lets the writer flush and shut the socket
        lock(&self.outbound).take();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        lock(&self.server_addr).take();

        self.notify_status(false);
        info!("{} disconnected from server", self.username);
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    read_half: OwnedReadHalf,
    read_timeout: Duration,
    generation: u64,
) {
    let mut lines = BufReader::new(read_half).lines();

    while shared.is_current(generation) {
        match timeout(read_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                shared.touch();
                shared.handle_line(&line);
            }
            Ok(Ok(None)) => {
                debug!("Server closed the connection");
                break;
            }
            Ok(Err(e)) => {
                if shared.is_current(generation) {
                    if is_connection_lost(&e) {
                        warn!("Connection lost: {}", e);
                        shared.report_error("Connection lost");
                    } else {
                        error!("Error reading messages: {}", e);
                        shared.report_error(&format!("Error reading messages: {}", e));
                    }
                }
                break;
            }
            Err(_) => {
                warn!("Socket timeout - server may be unreachable");
                shared.report_error("Connection timeout - server may be unreachable");
                break;
            }
        }
    }

    if shared.is_current(generation) {
        shared.disconnect();
    }
}

async fn keepalive_loop(shared: Arc<Shared>, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(time::Instant::now() + period, period);

    loop {
        ticker.tick().await;
        if !shared.connected.load(Ordering::SeqCst) {
            break;
        }
        debug!("Sending keepalive");
        shared.send_line("/ping");
    }
}

async fn write_loop<W>(
    shared: Arc<Shared>,
    mut writer: W,
    mut out_rx: mpsc::Receiver<String>,
    generation: u64,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = out_rx.recv().await {
        line.push('\n');
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if shared.is_current(generation) {
                error!("Error sending message: {}", e);
                shared.report_error("Failed to send message");
                shared.disconnect();
            }
            break;
        }
    }

    let _ = writer.shutdown().await;
}

fn is_connection_lost(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::OwnedWriteHalf;
    use tokio::net::TcpListener;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn client_with_events(
        name: &str,
        config: ClientConfig,
    ) -> (ChatClient, mpsc::UnboundedReceiver<ClientEvent>) {
        let client = ChatClient::with_config(name, config);
        let (tx, rx) = mpsc::unbounded_channel();
        client.set_message_listener(tx);
        (client, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Accept one connection and return its lines and write half
    async fn accept_one(
        listener: &TcpListener,
    ) -> (
        tokio::io::Lines<BufReader<OwnedReadHalf>>,
        OwnedWriteHalf,
    ) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        (BufReader::new(read_half).lines(), write_half)
    }

    /// Mark the client connected with an outbound queue of `capacity`
    fn attach_outbound(client: &ChatClient, capacity: usize) -> (mpsc::Receiver<String>, u64) {
        let (tx, rx) = mpsc::channel(capacity);
        *lock(&client.shared.outbound) = Some(tx);
        let generation = client.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        client.shared.connected.store(true, Ordering::SeqCst);
        (rx, generation)
    }

    #[tokio::test]
    async fn test_write_failure_disconnects() {
        let (client, mut events) = client_with_events("alice", ClientConfig::default());
        let (out_rx, generation) = attach_outbound(&client, OUTBOUND_BUFFER);

        // Peer end gone: every write fails with a broken pipe
        let (writer, peer) = tokio::io::duplex(64);
        drop(peer);
        tokio::spawn(write_loop(
            Arc::clone(&client.shared),
            writer,
            out_rx,
            generation,
        ));

        assert!(client.send_message("hello"));
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::Error("Failed to send message".into())
        );
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(false)
        );
        assert!(!client.is_connected());
        assert!(!client.send_message("again"));
    }

    #[tokio::test]
    async fn test_send_reports_stuck_or_closed_queue() {
        let (client, mut events) = client_with_events("alice", ClientConfig::default());
        let (out_rx, _) = attach_outbound(&client, 1);

        assert!(client.send_message("one"));
        assert!(!client.send_message("two"));
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::Error("Failed to send message".into())
        );

        drop(out_rx);
        assert!(!client.request_user_list());
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::Error("Failed to send message".into())
        );
    }

    #[tokio::test]
    async fn test_send_rejected_when_disconnected() {
        let client = ChatClient::new("alice");
        assert!(!client.is_connected());
        assert!(!client.send_message("hello"));
        assert!(!client.request_user_list());
        assert!(client.server_address().is_none());
    }

    #[tokio::test]
    async fn test_blank_messages_not_written() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, mut events) = client_with_events("alice", ClientConfig::default());

        assert!(client.connect("127.0.0.1", port).await);
        let (mut lines, _write_half) = accept_one(&listener).await;
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("alice"));
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(true)
        );
        assert!(client.is_connected());
        assert_eq!(client.server_address().map(|a| a.port()), Some(port));

        // A second connect is refused without callbacks
        assert!(!client.connect("127.0.0.1", port).await);
        assert!(client.is_connected());
        assert!(events.try_recv().is_err());

        assert!(!client.send_message(""));
        assert!(!client.send_message("   "));
        assert!(client.send_message("  hi  "));
        assert!(client.send_private_message("bob", "psst"));
        assert!(client.request_user_list());

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hi"));
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("/whisper bob psst")
        );
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("/users"));
    }

    #[tokio::test]
    async fn test_connect_failure_notifies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (client, mut events) = client_with_events("alice", ClientConfig::default());
        assert!(!client.connect("127.0.0.1", port).await);
        assert!(!client.is_connected());

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(false)
        );
        match next_event(&mut events).await {
            ClientEvent::Error(msg) => {
                assert!(msg.starts_with(&format!("Failed to connect to server at 127.0.0.1:{}", port)))
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, mut events) = client_with_events("alice", ClientConfig::default());

        assert!(client.connect("127.0.0.1", port).await);
        let (mut lines, _write_half) = accept_one(&listener).await;
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("alice"));
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(true)
        );

        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert!(!client.send_message("late"));

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(false)
        );
        // Transport released
        assert_eq!(lines.next_line().await.unwrap(), None);
        assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_inbound_lines_dispatched_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, mut events) = client_with_events("alice", ClientConfig::default());

        assert!(client.connect("127.0.0.1", port).await);
        let (_lines, mut write_half) = accept_one(&listener).await;
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(true)
        );

        let before = client.last_message_time();
        write_half
            .write_all(b"USERS:alice,bob\nUSERS:\nPRIVATE:bob (whisper): hey\nSYSTEM:bob joined the chat\nbob:hello\nERROR:oops\n")
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::UserListUpdated(vec!["alice".into(), "bob".into()])
        );
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::MessageReceived("bob (whisper): hey".into())
        );
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::MessageReceived("SYSTEM:bob joined the chat".into())
        );
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::MessageReceived("bob:hello".into())
        );
        assert_eq!(next_event(&mut events).await, ClientEvent::Error("oops".into()));
        assert!(client.last_message_time() > before);
    }

    #[tokio::test]
    async fn test_server_close_disconnects_quietly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, mut events) = client_with_events("alice", ClientConfig::default());

        assert!(client.connect("127.0.0.1", port).await);
        let (mut lines, write_half) = accept_one(&listener).await;
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("alice"));
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(true)
        );

        drop(lines);
        drop(write_half);

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(false)
        );
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_read_timeout_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig {
            read_timeout_ms: 100,
            ..ClientConfig::default()
        };
        let (client, mut events) = client_with_events("alice", config);

        assert!(client.connect("127.0.0.1", port).await);
        let (_lines, _write_half) = accept_one(&listener).await;
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(true)
        );

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::Error("Connection timeout - server may be unreachable".into())
        );
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ConnectionStatusChanged(false)
        );
    }

    #[tokio::test]
    async fn test_keepalive_pings() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig {
            keepalive_interval_ms: 50,
            ..ClientConfig::default()
        };
        let client = ChatClient::with_config("alice", config);

        assert!(client.connect("127.0.0.1", port).await);
        let (mut lines, _write_half) = accept_one(&listener).await;
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("alice"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("/ping"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("/ping"));

        // Stops with the connection
        client.disconnect();
        while let Some(line) = lines.next_line().await.unwrap() {
            assert_eq!(line, "/ping");
        }
    }

    #[tokio::test]
    async fn test_connection_check() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(test_connection("127.0.0.1", port, Duration::from_secs(1)).await);
        drop(listener);
        assert!(!test_connection("127.0.0.1", port, Duration::from_secs(1)).await);
    }
}
