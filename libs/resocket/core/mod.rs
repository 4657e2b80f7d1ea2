//! # Connection core
//!
//! The state machine, its builder and the default tokio-tungstenite
//! transport.
//!
//! ## Example
//!
//! ```rust,ignore
//! use resocket::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = resocket::builder()
//!         .url("wss://collab.example.com/socket")
//!         .backoff(ExponentialBackoff::new(
//!             Duration::from_millis(250),
//!             Duration::from_secs(30),
//!         ))
//!         .buffer(ArrayQueue::new())
//!         .heartbeat(HeartbeatOptions::new(
//!             Duration::from_secs(15),
//!             Duration::from_secs(5),
//!             WsMessage::from("ping"),
//!             WsMessage::from("pong"),
//!             2,
//!         ))
//!         .on_message(|event| println!("Event: {:?}", event))
//!         .build()?;
//!
//!     // Buffered until the socket opens
//!     connection.send(WsMessage::from("hello"))?;
//!
//!     connection.close(None, None);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod connection_state;
pub mod events;
pub mod heartbeat;
pub mod socket;

// Re-export main types
pub use builder::{states, ConnectionBuilder};
pub use config::{ConnectionConfig, ConnectionSettings, RetryOptions};
pub use connection::Connection;
pub use connection_state::{AtomicConnectionState, ConnectionState};
pub use events::{Event, EventType, Listener, ListenerOptions};
pub use heartbeat::{HeartbeatOptions, CLOSE_HEARTBEAT_TIMEOUT};
pub use socket::TungsteniteFactory;

/// Create a new connection builder
///
/// Convenience entry point for the builder pattern. Use
/// [`ConnectionBuilder::with_serializer`] to switch payload types.
///
/// # Example
/// ```ignore
/// let connection = resocket::builder()
///     .url("wss://api.example.com")
///     .backoff(ConstantBackoff::new(Duration::from_secs(1)))
///     .max_retries(5)
///     .with_serializer(JsonSerializer::<Request, Response>::new())
///     .on_message(|event| handle(event))
///     .build()?;
/// ```
pub fn builder() -> ConnectionBuilder<states::NoUrl, crate::traits::Identity> {
    ConnectionBuilder::new()
}
