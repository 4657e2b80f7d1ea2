//! tokio-tungstenite backed transport
//!
//! Each transport runs one socket task:
//!
//! ```text
//! Transport::send ──> outbound channel ──┐
//! Transport::close ─────────────────────┤
//!                                        v
//!                               ┌────────────────┐
//!                               │  socket task   │──> EventSink ──> Connection
//!                               │ (tokio spawn)  │
//!                               └────────────────┘
//! ```
//!
//! Ready state and the number of queued bytes are shared with the
//! transport handle through atomics.

use crate::traits::*;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

/// Default time to wait for the server to finish the close handshake
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates [`TungsteniteTransport`]s
#[derive(Debug, Clone)]
pub struct TungsteniteFactory {
    close_timeout: Duration,
}

impl TungsteniteFactory {
    pub fn new() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// How long a closing transport waits for the peer's close frame
    /// before reporting an unclean close
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl Default for TungsteniteFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for TungsteniteFactory {
    fn connect(&self, url: &str, protocols: &[String], events: EventSink) -> Box<dyn Transport> {
        let shared = Arc::new(SocketShared {
            ready_state: AtomicU8::new(ReadyState::CONNECTING),
            buffered: AtomicUsize::new(0),
            protocol: Mutex::new(None),
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(
            url.to_string(),
            protocols.to_vec(),
            events,
            outbound_rx,
            Arc::clone(&shared),
            self.close_timeout,
        ));

        Box::new(TungsteniteTransport {
            shared,
            outbound: outbound_tx,
            binary_type: BinaryType::default(),
        })
    }
}

/// Internal commands from the transport handle to its socket task
#[derive(Debug)]
enum Outbound {
    Frame(WsMessage),
    Close { code: u16, reason: String },
}

struct SocketShared {
    ready_state: AtomicU8,
    buffered: AtomicUsize,
    protocol: Mutex<Option<String>>,
}

impl SocketShared {
    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ReadyState) {
        self.ready_state.store(state.as_u8(), Ordering::Release);
    }
}

/// Handle to a tokio-tungstenite socket task
pub struct TungsteniteTransport {
    shared: Arc<SocketShared>,
    outbound: UnboundedSender<Outbound>,
    binary_type: BinaryType,
}

impl Transport for TungsteniteTransport {
    fn send(&mut self, message: WsMessage) -> Result<()> {
        if self.shared.state() != ReadyState::Open {
            return Err(ResocketError::ConnectionClosed("transport is not open".into()));
        }
        let len = message.len();
        self.shared.buffered.fetch_add(len, Ordering::AcqRel);
        self.outbound.send(Outbound::Frame(message)).map_err(|_| {
            self.shared.buffered.fetch_sub(len, Ordering::AcqRel);
            ResocketError::Transport("socket task has exited".into())
        })
    }

    fn close(&mut self, code: Option<u16>, reason: Option<String>) {
        if matches!(self.shared.state(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.shared.set_state(ReadyState::Closing);
        let _ = self.outbound.send(Outbound::Close {
            code: code.unwrap_or(CLOSE_NORMAL),
            reason: reason.unwrap_or_default(),
        });
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    fn buffered_amount(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    fn binary_type(&self) -> BinaryType {
        self.binary_type
    }

    fn set_binary_type(&mut self, binary_type: BinaryType) {
        self.binary_type = binary_type;
    }

    fn protocol(&self) -> Option<String> {
        self.shared.protocol.lock().clone()
    }
}

/// Build the handshake request, requesting subprotocols if any
fn build_request(url: &str, protocols: &[String]) -> Result<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ResocketError::Transport(format!("invalid URL {}: {}", url, e)))?;

    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| ResocketError::Configuration(format!("invalid subprotocol: {}", e)))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }
    Ok(request)
}

/// Socket task: connect, then pump frames both ways until closed
async fn run_socket(
    url: String,
    protocols: Vec<String>,
    events: EventSink,
    mut outbound: UnboundedReceiver<Outbound>,
    shared: Arc<SocketShared>,
    close_timeout: Duration,
) {
    let request = match build_request(&url, &protocols) {
        Ok(request) => request,
        Err(e) => {
            shared.set_state(ReadyState::Closed);
            events.error(e.to_string());
            events.close(CLOSE_ABNORMAL, e.to_string(), false);
            return;
        }
    };

    let connect = connect_async(request);
    tokio::pin!(connect);

    // Still connecting: the only command that matters is close
    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws_stream, response)) => {
                    if let Some(protocol) = response
                        .headers()
                        .get(SEC_WEBSOCKET_PROTOCOL)
                        .and_then(|value| value.to_str().ok())
                    {
                        *shared.protocol.lock() = Some(protocol.to_string());
                    }
                    break ws_stream;
                }
                Err(e) => {
                    debug!("Failed to connect to {}: {}", url, e);
                    shared.set_state(ReadyState::Closed);
                    events.error(e.to_string());
                    events.close(CLOSE_ABNORMAL, e.to_string(), false);
                    return;
                }
            },
            command = outbound.recv() => match command {
                Some(Outbound::Frame(_)) => warn!("Dropping frame queued before open"),
                Some(Outbound::Close { code, reason }) => {
                    shared.set_state(ReadyState::Closed);
                    events.close(code, reason, false);
                    return;
                }
                None => {
                    shared.set_state(ReadyState::Closed);
                    return;
                }
            },
        }
    };

    // A close requested during the handshake wins over the open
    if shared.state() == ReadyState::Connecting {
        shared.set_state(ReadyState::Open);
        events.open();
    }

    let (mut write, mut read) = ws_stream.split();
    let mut close_frame: Option<(u16, String)> = None;
    let mut closing_deadline: Option<tokio::time::Instant> = None;

    loop {
        let deadline_at = closing_deadline;
        let deadline = async move {
            match deadline_at {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.message(WsMessage::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.message(WsMessage::Binary(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Close frame received");
                    close_frame = Some(match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (CLOSE_NORMAL, String::new()),
                    });
                    shared.set_state(ReadyState::Closing);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => break,
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    events.error(e.to_string());
                    break;
                }
            },

            command = outbound.recv(), if closing_deadline.is_none() => match command {
                Some(Outbound::Frame(message)) => {
                    let len = message.len();
                    let result = write.send(ws_message_to_tungstenite(message)).await;
                    shared.buffered.fetch_sub(len, Ordering::AcqRel);
                    if let Err(e) = result {
                        warn!("Failed to write frame: {}", e);
                        events.error(e.to_string());
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!("Sending close frame ({})", code);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if write.send(Message::Close(Some(frame))).await.is_err() {
                        break;
                    }
                    closing_deadline = Some(tokio::time::Instant::now() + close_timeout);
                }
                None => {
                    debug!("Transport handle dropped, closing socket");
                    let _ = write.close().await;
                    break;
                }
            },

            _ = deadline => {
                debug!("Close handshake timed out");
                break;
            }
        }
    }

    shared.set_state(ReadyState::Closed);
    shared.buffered.store(0, Ordering::Release);
    match close_frame {
        Some((code, reason)) => events.close(code, reason, true),
        None => events.close(CLOSE_ABNORMAL, "connection lost", false),
    };
}

/// Convert WsMessage to tungstenite Message
fn ws_message_to_tungstenite(msg: WsMessage) -> Message {
    match msg {
        WsMessage::Text(text) => Message::Text(text),
        WsMessage::Binary(data) => Message::Binary(data),
    }
}
