//! Common test utilities for resocket integration tests
//!
//! Most tests drive the connection through [`FakeNetwork`], an in-memory
//! transport factory whose sockets are opened, fed and dropped by hand.
//! [`MockWsServer`] is a real echo server for end-to-end checks of the
//! tokio-tungstenite transport.

#![allow(dead_code)]

use parking_lot::Mutex;
use resocket::*;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Route connection logs to the test output (filtered by RUST_LOG)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let the connection task catch up with everything already queued
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Move the paused clock forward, then settle
pub async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

/// Collect every event of the given types
pub fn record<S>(connection: &Connection<S>, event_types: &[EventType]) -> Arc<Mutex<Vec<Event<S::Inbound>>>>
where
    S: Serializer,
    S::Inbound: Clone,
{
    let events = Arc::new(Mutex::new(Vec::new()));
    for &event_type in event_types {
        let events = Arc::clone(&events);
        connection.on(event_type, move |event| events.lock().push(event.clone()));
    }
    events
}

#[derive(Debug, Default)]
struct SocketInner {
    ready_state: Option<ReadyState>,
    sent: Vec<WsMessage>,
    closes: Vec<(Option<u16>, Option<String>)>,
    binary_type: BinaryType,
}

/// Test-side handle to one fake socket
#[derive(Clone)]
pub struct FakeSocket {
    pub url: String,
    pub protocols: Vec<String>,
    inner: Arc<Mutex<SocketInner>>,
    events: EventSink,
}

impl FakeSocket {
    fn new(url: &str, protocols: &[String], events: EventSink) -> Self {
        Self {
            url: url.to_string(),
            protocols: protocols.to_vec(),
            inner: Arc::new(Mutex::new(SocketInner {
                ready_state: Some(ReadyState::Connecting),
                ..SocketInner::default()
            })),
            events,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.lock().ready_state.unwrap_or(ReadyState::Closed)
    }

    fn set_ready_state(&self, state: ReadyState) {
        self.inner.lock().ready_state = Some(state);
    }

    /// Complete the handshake
    pub fn open(&self) {
        self.set_ready_state(ReadyState::Open);
        self.events.open();
    }

    /// Deliver a frame from the peer
    pub fn receive(&self, message: impl Into<WsMessage>) {
        self.events.message(message.into());
    }

    /// Fail the way a refused connection does: error, then abnormal close
    pub fn fail(&self, reason: &str) {
        self.set_ready_state(ReadyState::Closed);
        self.events.error(reason);
        self.events.close(CLOSE_ABNORMAL, reason, false);
    }

    /// Lose the connection without an error event
    pub fn drop_connection(&self) {
        self.set_ready_state(ReadyState::Closed);
        self.events.close(CLOSE_ABNORMAL, "connection lost", false);
    }

    /// Frames written while open
    pub fn sent(&self) -> Vec<WsMessage> {
        self.inner.lock().sent.clone()
    }

    /// Arguments of every effective `close` call
    pub fn closes(&self) -> Vec<(Option<u16>, Option<String>)> {
        self.inner.lock().closes.clone()
    }

    pub fn binary_type(&self) -> BinaryType {
        self.inner.lock().binary_type
    }

    pub fn is_detached(&self) -> bool {
        self.events.is_detached()
    }
}

struct FakeTransport {
    socket: FakeSocket,
}

impl Transport for FakeTransport {
    fn send(&mut self, message: WsMessage) -> Result<()> {
        let mut inner = self.socket.inner.lock();
        if inner.ready_state != Some(ReadyState::Open) {
            return Err(ResocketError::ConnectionClosed("fake socket is not open".into()));
        }
        inner.sent.push(message);
        Ok(())
    }

    fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        {
            let mut inner = self.socket.inner.lock();
            if matches!(inner.ready_state, Some(ReadyState::Closing) | Some(ReadyState::Closed)) {
                return;
            }
            inner.ready_state = Some(ReadyState::Closed);
            inner.closes.push((code, reason.clone()));
        }
        self.socket
            .events
            .close(code.unwrap_or(CLOSE_NORMAL), reason.unwrap_or_default(), true);
    }

    fn ready_state(&self) -> ReadyState {
        self.socket.ready_state()
    }

    fn buffered_amount(&self) -> usize {
        0
    }

    fn binary_type(&self) -> BinaryType {
        self.socket.binary_type()
    }

    fn set_binary_type(&mut self, binary_type: BinaryType) {
        self.socket.inner.lock().binary_type = binary_type;
    }

    fn protocol(&self) -> Option<String> {
        self.socket.protocols.first().cloned()
    }
}

#[derive(Default)]
struct NetworkInner {
    sockets: Vec<FakeSocket>,
    auto_fail: bool,
}

/// In-memory transport factory recording every socket it creates
#[derive(Clone, Default)]
pub struct FakeNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every new socket fails right away
    pub fn failing() -> Self {
        let network = Self::new();
        network.set_auto_fail(true);
        network
    }

    pub fn set_auto_fail(&self, auto_fail: bool) {
        self.inner.lock().auto_fail = auto_fail;
    }

    pub fn count(&self) -> usize {
        self.inner.lock().sockets.len()
    }

    pub fn socket(&self, index: usize) -> FakeSocket {
        self.inner.lock().sockets[index].clone()
    }

    pub fn last(&self) -> FakeSocket {
        self.inner
            .lock()
            .sockets
            .last()
            .cloned()
            .expect("no socket created yet")
    }

    pub fn urls(&self) -> Vec<String> {
        self.inner.lock().sockets.iter().map(|s| s.url.clone()).collect()
    }
}

impl TransportFactory for FakeNetwork {
    fn connect(&self, url: &str, protocols: &[String], events: EventSink) -> Box<dyn Transport> {
        let socket = FakeSocket::new(url, protocols, events);
        let auto_fail = {
            let mut inner = self.inner.lock();
            inner.sockets.push(socket.clone());
            inner.auto_fail
        };
        if auto_fail {
            socket.fail("connection refused");
        }
        Box::new(FakeTransport { socket })
    }
}

/// Backoff returning a fixed sequence of delays, repeating the last one
#[derive(Clone)]
pub struct SequenceBackoff {
    delays: Vec<Duration>,
    retries: usize,
    resets: Arc<AtomicUsize>,
}

impl SequenceBackoff {
    pub fn new(delays_ms: &[u64]) -> Self {
        Self {
            delays: delays_ms.iter().copied().map(Duration::from_millis).collect(),
            retries: 0,
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of `reset` calls, shared with clones
    pub fn resets(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resets)
    }
}

impl Backoff for SequenceBackoff {
    fn next(&mut self) -> Duration {
        let index = self.retries.min(self.delays.len().saturating_sub(1));
        self.retries += 1;
        self.delays.get(index).copied().unwrap_or_default()
    }

    fn reset(&mut self) {
        self.retries = 0;
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn retries(&self) -> usize {
        self.retries
    }

    fn current(&self) -> Duration {
        let index = self.retries.saturating_sub(1).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or_default()
    }
}

/// A simple mock WebSocket server for testing
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl MockWsServer {
    /// Create and start a new echo server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let shutdown = shutdown_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self { addr, shutdown }
    }

    async fn handle_connection(stream: tokio::net::TcpStream, shutdown: Arc<Notify>) {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        // "bye" asks the server to hang up with a custom code
                        Some(Ok(Message::Text(text))) if text == "bye" => {
                            let frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
                                code: 4001.into(),
                                reason: "server bye".into(),
                            };
                            let _ = write.send(Message::Close(Some(frame))).await;
                        }
                        Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                            if write.send(msg).await.is_err() {
                                break;
                            }
                        }
                        // Keep reading so the close reply gets flushed
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
