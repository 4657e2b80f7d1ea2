//! Transport seam
//!
//! The connection never talks to a socket directly. It asks a
//! [`TransportFactory`] for a fresh [`Transport`] on every attempt and
//! receives that transport's events through an [`EventSink`]. Dropping the
//! receiving end of a sink detaches the connection from the old transport.

use crate::error::Result;
use crate::message::WsMessage;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Close code used when a transport goes away without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code for a normal, user-initiated close
pub const CLOSE_NORMAL: u16 = 1000;

/// Transport readiness, numbered like the standard WebSocket constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub const CONNECTING: u8 = 0;
    pub const OPEN: u8 = 1;
    pub const CLOSING: u8 = 2;
    pub const CLOSED: u8 = 3;

    /// Convert from the numeric constant, treating unknown values as closed
    pub fn from_u8(value: u8) -> Self {
        match value {
            Self::CONNECTING => ReadyState::Connecting,
            Self::OPEN => ReadyState::Open,
            Self::CLOSING => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// How binary frames should be surfaced by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryType {
    #[default]
    Blob,
    ArrayBuffer,
}

/// Raw events emitted by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(WsMessage),
    Error(String),
    Close {
        code: u16,
        reason: String,
        was_clean: bool,
    },
}

/// Sending half of a transport's event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Create a sink together with the receiver the connection listens on
    pub fn channel() -> (Self, UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. Returns false once the connection has detached.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn message(&self, message: WsMessage) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(message.into()))
    }

    pub fn close(&self, code: u16, reason: impl Into<String>, was_clean: bool) -> bool {
        self.emit(TransportEvent::Close {
            code,
            reason: reason.into(),
            was_clean,
        })
    }

    /// Whether the connection has stopped listening to this transport
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A single underlying bidirectional socket
///
/// Implementations must not block: `send` queues the frame, `close` starts
/// the closing handshake. Completion is reported through the event sink.
pub trait Transport: Send {
    /// Queue a frame for delivery
    fn send(&mut self, message: WsMessage) -> Result<()>;

    /// Begin closing. Calling this on a closing or closed transport is a no-op.
    fn close(&mut self, code: Option<u16>, reason: Option<String>);

    fn ready_state(&self) -> ReadyState;

    /// Bytes queued by `send` but not yet written to the network
    fn buffered_amount(&self) -> usize;

    fn binary_type(&self) -> BinaryType;

    fn set_binary_type(&mut self, binary_type: BinaryType);

    /// Subprotocol selected by the server, if any
    fn protocol(&self) -> Option<String> {
        None
    }
}

/// Trait for constructing transports
///
/// Called once per connection attempt with the freshly resolved URL.
/// Construction never fails synchronously: problems are reported as an
/// `Error` followed by a `Close` event on the sink.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, url: &str, protocols: &[String], events: EventSink) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str, &[String], EventSink) -> Box<dyn Transport> + Send + Sync,
{
    fn connect(&self, url: &str, protocols: &[String], events: EventSink) -> Box<dyn Transport> {
        self(url, protocols, events)
    }
}
