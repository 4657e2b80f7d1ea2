//! # Resocket Traits
//!
//! Pluggable seams of the resilient connection:
//!
//! - **Backoff**: Compute retry delays and count consecutive retries
//! - **Buffer**: Stage outbound payloads while disconnected
//! - **Serializer**: Convert logical payloads to and from wire frames
//! - **TransportFactory**: Construct the underlying socket per attempt
//! - **UrlProvider**: Resolve the connection URL per attempt

pub mod backoff;
pub mod buffer;
pub mod error;
pub mod message;
pub mod serializer;
pub mod transport;
pub mod url;

// Re-export commonly used types
pub use backoff::{Backoff, ConstantBackoff, ExponentialBackoff, LinearBackoff};
pub use buffer::{ArrayQueue, Buffer, RingQueue};
pub use error::{ResocketError, Result};
pub use message::WsMessage;
pub use serializer::{Identity, JsonSerializer, Serializer};
pub use transport::{
    BinaryType, EventSink, ReadyState, Transport, TransportEvent, TransportFactory,
    CLOSE_ABNORMAL, CLOSE_NORMAL,
};
pub use url::{FnUrlProvider, UrlProvider, UrlSource};
